//! Client-side request rate limiting
//!
//! Tracks recent outbound request timestamps in a sliding one-minute window
//! and exposes admission decisions plus a cooldown state entered when the
//! backend itself signals overload. The limiter only gates admission; it never
//! retries and never issues calls of its own.

use crate::error::{Result, SessionError};
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use tracing::{info, warn};

/// Width of the sliding request window in seconds
pub const WINDOW_SECONDS: i64 = 60;

/// Sliding-window rate limiter with backend-triggered cooldown
///
/// Callers must check `can_make_request` immediately before `record_request`
/// and only proceed when admitted; the limiter does not itself enforce
/// atomicity of check-then-act (a single-threaded caller is assumed).
#[derive(Debug)]
pub struct RateLimiter {
    max_per_minute: usize,
    /// Request timestamps within the window, oldest first
    window: VecDeque<DateTime<Utc>>,
    suspended: bool,
    resume_at: Option<DateTime<Utc>>,
}

impl RateLimiter {
    /// Create a limiter admitting at most `max_per_minute` requests per window
    ///
    /// A zero maximum is a misconfiguration, not a runtime state, and is
    /// rejected at construction.
    pub fn new(max_per_minute: usize) -> Result<Self> {
        if max_per_minute == 0 {
            return Err(SessionError::Configuration {
                message: "max_per_minute must be greater than 0".to_string(),
            }
            .into());
        }

        Ok(Self {
            max_per_minute,
            window: VecDeque::new(),
            suspended: false,
            resume_at: None,
        })
    }

    /// Drop window entries older than `now - 60s`
    fn purge(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(WINDOW_SECONDS);
        while matches!(self.window.front(), Some(t) if *t < cutoff) {
            self.window.pop_front();
        }
    }

    /// Whether a suspension is active at `now`
    ///
    /// Suspension ends exactly when the current time passes the resume
    /// timestamp, so admission stays correct even between `tick` calls.
    pub fn is_suspended(&self, now: DateTime<Utc>) -> bool {
        self.suspended && matches!(self.resume_at, Some(resume) if now <= resume)
    }

    /// Whether an outbound request is admitted at `now`
    pub fn can_make_request(&mut self, now: DateTime<Utc>) -> bool {
        self.purge(now);
        !self.is_suspended(now) && self.window.len() < self.max_per_minute
    }

    /// Record an outbound request issued at `now`
    pub fn record_request(&mut self, now: DateTime<Utc>) {
        self.window.push_back(now);
    }

    /// Enter cooldown after a backend-signaled rate limit rejection
    ///
    /// The window is cleared: a fresh start after the cooldown is safer than
    /// resuming a partially consumed window against a backend that already
    /// signaled overload.
    pub fn on_rejected(&mut self, now: DateTime<Utc>, cooldown: Duration) {
        self.suspended = true;
        self.resume_at = Some(now + cooldown);
        self.window.clear();

        warn!(
            "Backend rate limit hit, outbound calls suspended for {}s",
            cooldown.num_seconds()
        );
    }

    /// Clear an expired suspension
    pub fn tick(&mut self, now: DateTime<Utc>) {
        if self.suspended && matches!(self.resume_at, Some(resume) if now > resume) {
            self.suspended = false;
            self.resume_at = None;
            info!("Rate limit cooldown expired, outbound calls resumed");
        }
    }

    /// Number of requests currently inside the window (diagnostic)
    pub fn requests_in_window(&mut self, now: DateTime<Utc>) -> usize {
        self.purge(now);
        self.window.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn test_zero_max_rejected_at_construction() {
        assert!(RateLimiter::new(0).is_err());
        assert!(RateLimiter::new(1).is_ok());
    }

    #[test]
    fn test_window_admission_and_expiry() {
        let mut limiter = RateLimiter::new(3).unwrap();

        limiter.record_request(t(0));
        limiter.record_request(t(10));
        assert!(limiter.can_make_request(t(20)));

        limiter.record_request(t(20));
        assert!(!limiter.can_make_request(t(25)));

        // t=0 entry has aged out of the trailing minute by t=61
        assert!(limiter.can_make_request(t(61)));
        assert_eq!(limiter.requests_in_window(t(61)), 2);
    }

    #[test]
    fn test_admission_denied_once_count_reaches_max() {
        let mut limiter = RateLimiter::new(2).unwrap();

        assert!(limiter.can_make_request(t(0)));
        limiter.record_request(t(0));
        assert!(limiter.can_make_request(t(1)));
        limiter.record_request(t(1));

        assert!(!limiter.can_make_request(t(2)));
    }

    #[test]
    fn test_rejection_suspends_and_clears_window() {
        let mut limiter = RateLimiter::new(30).unwrap();
        limiter.record_request(t(0));
        limiter.record_request(t(5));

        limiter.on_rejected(t(10), Duration::seconds(60));

        assert_eq!(limiter.requests_in_window(t(10)), 0);
        assert!(!limiter.can_make_request(t(10)));
        assert!(!limiter.can_make_request(t(69)));
        assert!(!limiter.can_make_request(t(70)));

        // Suspension clears exactly when now passes the resume timestamp
        assert!(limiter.can_make_request(t(71)));
    }

    #[test]
    fn test_tick_clears_expired_suspension() {
        let mut limiter = RateLimiter::new(30).unwrap();
        limiter.on_rejected(t(0), Duration::seconds(30));

        limiter.tick(t(20));
        assert!(limiter.is_suspended(t(20)));

        limiter.tick(t(31));
        assert!(!limiter.is_suspended(t(31)));
        assert!(limiter.can_make_request(t(31)));
    }

    proptest! {
        /// A caller that respects admission never holds more than max
        /// requests inside any trailing window.
        #[test]
        fn prop_admitted_requests_never_exceed_max(
            max in 1usize..10,
            mut offsets in proptest::collection::vec(0i64..300, 0..60),
        ) {
            offsets.sort_unstable();
            let mut limiter = RateLimiter::new(max).unwrap();

            for offset in offsets {
                let now = t(offset);
                if limiter.can_make_request(now) {
                    limiter.record_request(now);
                }
                prop_assert!(limiter.requests_in_window(now) <= max);
            }
        }

        /// After a backend rejection every instant before the resume time is
        /// denied, and the window restarts empty.
        #[test]
        fn prop_cooldown_denies_until_resume(
            cooldown in 1i64..120,
            probe in 0i64..120,
        ) {
            let mut limiter = RateLimiter::new(30).unwrap();
            limiter.record_request(t(0));
            limiter.on_rejected(t(0), Duration::seconds(cooldown));

            prop_assert_eq!(limiter.requests_in_window(t(0)), 0);

            let now = t(probe);
            limiter.tick(now);
            if probe <= cooldown {
                prop_assert!(!limiter.can_make_request(now));
            } else {
                prop_assert!(limiter.can_make_request(now));
            }
        }
    }
}
