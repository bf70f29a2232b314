//! Lobby discovery and refresh scheduling
//!
//! `LobbyDirectory` owns the current snapshot of discoverable lobbies and the
//! refresh protocol: local admission check, remote query, defensive filter,
//! atomic snapshot replacement, observer notification. Auto-refresh is driven
//! by an external `auto_refresh_tick(now)` call, decoupled from any frame
//! loop; it and the rate-limit budget are independent knobs because manual
//! refreshes consume the same budget.

use crate::backend::{
    is_rate_limit_signal, FilterField, FilterOp, OrderField, QueryFilter, QueryLobbiesOptions,
    QueryOrder, SessionBackend,
};
use crate::error::{Result, SessionError};
use crate::rate_limit::RateLimiter;
use crate::types::Lobby;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Configuration for lobby discovery
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Result cap for discovery queries
    pub max_results: usize,
    /// Seconds between automatic refreshes
    pub auto_refresh_interval_seconds: i64,
    /// Whether auto-refresh starts enabled
    pub auto_refresh: bool,
    /// Request budget per sliding minute
    pub max_requests_per_minute: usize,
    /// Cooldown after a backend-signaled rate limit, in seconds
    pub cooldown_seconds: i64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            max_results: 25,
            // Steady-state polling at 15s stays well under 30 requests/minute
            auto_refresh_interval_seconds: 15,
            auto_refresh: false,
            max_requests_per_minute: 30,
            cooldown_seconds: 60,
        }
    }
}

/// Callback invoked with the new snapshot after each successful refresh
#[async_trait]
pub trait DirectoryObserver: Send + Sync {
    async fn lobbies_updated(&self, lobbies: &[Lobby]);
}

/// Observer that ignores updates
#[derive(Debug, Default)]
pub struct NoopObserver;

#[async_trait]
impl DirectoryObserver for NoopObserver {
    async fn lobbies_updated(&self, _lobbies: &[Lobby]) {}
}

#[derive(Debug)]
struct DirectoryState {
    lobbies: Vec<Lobby>,
    last_refresh: Option<DateTime<Utc>>,
    auto_refresh: bool,
}

/// Clears the in-flight flag on every exit path
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owner of the discoverable-lobby snapshot
pub struct LobbyDirectory {
    backend: Arc<dyn SessionBackend>,
    observer: Arc<dyn DirectoryObserver>,
    config: DirectoryConfig,
    limiter: Mutex<RateLimiter>,
    state: Mutex<DirectoryState>,
    refresh_in_flight: AtomicBool,
}

impl LobbyDirectory {
    pub fn new(backend: Arc<dyn SessionBackend>, config: DirectoryConfig) -> Result<Self> {
        Self::with_observer(backend, Arc::new(NoopObserver), config)
    }

    pub fn with_observer(
        backend: Arc<dyn SessionBackend>,
        observer: Arc<dyn DirectoryObserver>,
        config: DirectoryConfig,
    ) -> Result<Self> {
        let limiter = RateLimiter::new(config.max_requests_per_minute)?;
        let auto_refresh = config.auto_refresh;

        Ok(Self {
            backend,
            observer,
            config,
            limiter: Mutex::new(limiter),
            state: Mutex::new(DirectoryState {
                lobbies: Vec::new(),
                last_refresh: None,
                auto_refresh,
            }),
            refresh_in_flight: AtomicBool::new(false),
        })
    }

    fn limiter(&self) -> Result<MutexGuard<'_, RateLimiter>> {
        self.limiter.lock().map_err(|_| {
            SessionError::Internal {
                message: "rate limiter lock poisoned".to_string(),
            }
            .into()
        })
    }

    fn state(&self) -> Result<MutexGuard<'_, DirectoryState>> {
        self.state.lock().map_err(|_| {
            SessionError::Internal {
                message: "directory state lock poisoned".to_string(),
            }
            .into()
        })
    }

    fn discovery_query(&self) -> QueryLobbiesOptions {
        QueryLobbiesOptions {
            count: self.config.max_results,
            filters: vec![
                QueryFilter::new(FilterField::AvailableSlots, FilterOp::Gt, "0"),
                QueryFilter::new(FilterField::IsLocked, FilterOp::Eq, "false"),
            ],
            order: vec![QueryOrder {
                field: OrderField::Created,
                descending: true,
            }],
        }
    }

    /// Refresh the snapshot from the backend
    ///
    /// Fails with `RateLimited` before any remote call when local admission
    /// is denied; with `BackendRateLimited` (entering cooldown) when the
    /// backend signals overload; with `Backend` on any other remote failure.
    pub async fn refresh(&self, now: DateTime<Utc>) -> Result<Vec<Lobby>> {
        if self
            .refresh_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionError::InvalidState {
                reason: "refresh already in flight".to_string(),
            }
            .into());
        }
        let _guard = InFlightGuard(&self.refresh_in_flight);

        {
            let mut limiter = self.limiter()?;
            if !limiter.can_make_request(now) {
                debug!("Refresh denied by local rate limiter");
                return Err(SessionError::RateLimited.into());
            }
            limiter.record_request(now);
        }

        match self.backend.query_lobbies(self.discovery_query()).await {
            Ok(response) => {
                let mut lobbies = response.results;
                // The backend already filtered, but the discovery invariant
                // (no locked or full lobbies) is enforced locally as well.
                lobbies.retain(|lobby| lobby.is_open());

                {
                    let mut state = self.state()?;
                    state.lobbies = lobbies.clone();
                    state.last_refresh = Some(now);
                }

                info!("Found {} available lobbies", lobbies.len());
                self.observer.lobbies_updated(&lobbies).await;
                Ok(lobbies)
            }
            Err(e) => {
                let message = e.to_string();
                if is_rate_limit_signal(&message) {
                    self.limiter()?
                        .on_rejected(now, Duration::seconds(self.config.cooldown_seconds));
                    Err(SessionError::BackendRateLimited.into())
                } else {
                    Err(SessionError::Backend { message }.into())
                }
            }
        }
    }

    /// Drive cooldown expiry and scheduled refreshes
    ///
    /// Returns `Ok(Some(..))` when a refresh ran, `Ok(None)` when the tick
    /// skipped (disabled, interval not elapsed, limiter closed, or a refresh
    /// already in flight). A skipped tick is not an error.
    pub async fn auto_refresh_tick(&self, now: DateTime<Utc>) -> Result<Option<Vec<Lobby>>> {
        self.limiter()?.tick(now);

        {
            let state = self.state()?;
            if !state.auto_refresh {
                return Ok(None);
            }

            let due = match state.last_refresh {
                None => true,
                Some(last) => {
                    now - last > Duration::seconds(self.config.auto_refresh_interval_seconds)
                }
            };
            if !due {
                return Ok(None);
            }
        }

        if self.refresh_in_flight.load(Ordering::SeqCst) {
            debug!("Skipping scheduled refresh, one is already in flight");
            return Ok(None);
        }

        if !self.limiter()?.can_make_request(now) {
            debug!("Skipping scheduled refresh, approaching rate limit");
            return Ok(None);
        }

        self.refresh(now).await.map(Some)
    }

    /// Defensive copy of the current snapshot; never blocks on remote work
    pub fn snapshot(&self) -> Vec<Lobby> {
        self.state
            .lock()
            .map(|state| state.lobbies.clone())
            .unwrap_or_default()
    }

    pub fn set_auto_refresh(&self, enabled: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.auto_refresh = enabled;
            info!(
                "Auto refresh {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
    }

    pub fn auto_refresh_enabled(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.auto_refresh)
            .unwrap_or(false)
    }

    /// Instant of the last successful refresh
    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.state.lock().ok().and_then(|state| state.last_refresh)
    }

    /// Requests currently counted against the sliding window (diagnostic)
    pub fn requests_in_window(&self, now: DateTime<Utc>) -> usize {
        self.limiter
            .lock()
            .map(|mut limiter| limiter.requests_in_window(now))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CreateLobbyOptions, InMemorySessionBackend, QueryResponse};
    use crate::types::{DataValue, GAME_MODE_KEY};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn kind(err: &anyhow::Error) -> &SessionError {
        err.downcast_ref::<SessionError>()
            .expect("expected a SessionError")
    }

    async fn seeded_backend(lobbies: usize) -> Arc<InMemorySessionBackend> {
        let backend = Arc::new(InMemorySessionBackend::new());
        for i in 0..lobbies {
            let mut metadata = HashMap::new();
            metadata.insert(GAME_MODE_KEY.to_string(), DataValue::public("RockRun"));
            backend
                .create_lobby(
                    &format!("Lobby{i}"),
                    4,
                    CreateLobbyOptions {
                        is_private: false,
                        metadata,
                    },
                )
                .await
                .unwrap();
        }
        backend
    }

    /// Backend that always reports a rate-limit rejection
    struct OverloadedBackend;

    #[async_trait]
    impl SessionBackend for OverloadedBackend {
        async fn create_lobby(
            &self,
            _name: &str,
            _max_players: usize,
            _options: CreateLobbyOptions,
        ) -> Result<Lobby> {
            Err(anyhow::anyhow!("Rate limit exceeded"))
        }

        async fn query_lobbies(&self, _options: QueryLobbiesOptions) -> Result<QueryResponse> {
            Err(anyhow::anyhow!("Rate limit exceeded"))
        }

        async fn join_lobby_by_id(&self, _lobby_id: &str) -> Result<Lobby> {
            Err(anyhow::anyhow!("Rate limit exceeded"))
        }

        async fn join_lobby_by_code(&self, _lobby_code: &str) -> Result<Lobby> {
            Err(anyhow::anyhow!("Rate limit exceeded"))
        }

        async fn remove_player(&self, _lobby_id: &str, _player_id: &str) -> Result<()> {
            Err(anyhow::anyhow!("Rate limit exceeded"))
        }

        async fn create_relay_allocation(&self, _max_connections: usize) -> Result<crate::types::Allocation> {
            Err(anyhow::anyhow!("Rate limit exceeded"))
        }

        async fn get_join_code(&self, _allocation_id: &str) -> Result<String> {
            Err(anyhow::anyhow!("Rate limit exceeded"))
        }

        async fn join_relay_allocation(&self, _join_code: &str) -> Result<crate::types::Allocation> {
            Err(anyhow::anyhow!("Rate limit exceeded"))
        }
    }

    /// Observer that remembers every snapshot it was handed
    #[derive(Default)]
    struct RecordingObserver {
        updates: AtomicUsize,
        last_count: AtomicUsize,
    }

    #[async_trait]
    impl DirectoryObserver for RecordingObserver {
        async fn lobbies_updated(&self, lobbies: &[Lobby]) {
            self.updates.fetch_add(1, Ordering::SeqCst);
            self.last_count.store(lobbies.len(), Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_refresh_stores_snapshot_and_notifies() {
        let backend = seeded_backend(3).await;
        let observer = Arc::new(RecordingObserver::default());
        let directory = LobbyDirectory::with_observer(
            backend,
            observer.clone(),
            DirectoryConfig::default(),
        )
        .unwrap();

        let lobbies = directory.refresh(t(0)).await.unwrap();
        assert_eq!(lobbies.len(), 3);
        assert_eq!(directory.snapshot().len(), 3);
        assert_eq!(directory.last_refresh(), Some(t(0)));
        assert_eq!(observer.updates.load(Ordering::SeqCst), 1);
        assert_eq!(observer.last_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_snapshot_is_idempotent_and_defensive() {
        let backend = seeded_backend(2).await;
        let directory = LobbyDirectory::new(backend, DirectoryConfig::default()).unwrap();
        directory.refresh(t(0)).await.unwrap();

        let first = directory.snapshot();
        let mut mutated = directory.snapshot();
        let ids: Vec<_> = mutated.iter().map(|l| l.id.clone()).collect();
        mutated.clear();

        let second = directory.snapshot();
        let second_ids: Vec<_> = second.iter().map(|l| l.id.clone()).collect();
        assert_eq!(first.len(), 2);
        assert_eq!(ids, second_ids);
    }

    #[tokio::test]
    async fn test_local_admission_denial_precedes_remote_call() {
        let backend = seeded_backend(1).await;
        let config = DirectoryConfig {
            max_requests_per_minute: 2,
            ..DirectoryConfig::default()
        };
        let directory = LobbyDirectory::new(backend, config).unwrap();

        directory.refresh(t(0)).await.unwrap();
        directory.refresh(t(1)).await.unwrap();

        let err = directory.refresh(t(2)).await.unwrap_err();
        assert!(matches!(kind(&err), SessionError::RateLimited));
        assert_eq!(directory.requests_in_window(t(2)), 2);

        // Entries age out of the window and admission returns
        assert!(directory.refresh(t(62)).await.is_ok());
    }

    #[tokio::test]
    async fn test_backend_rate_limit_enters_cooldown() {
        let directory =
            LobbyDirectory::new(Arc::new(OverloadedBackend), DirectoryConfig::default()).unwrap();

        let err = directory.refresh(t(0)).await.unwrap_err();
        assert!(matches!(kind(&err), SessionError::BackendRateLimited));

        // While suspended, the failure is local admission, not another call
        let err = directory.refresh(t(30)).await.unwrap_err();
        assert!(matches!(kind(&err), SessionError::RateLimited));
    }

    #[tokio::test]
    async fn test_other_backend_errors_pass_through() {
        struct BrokenBackend;

        #[async_trait]
        impl SessionBackend for BrokenBackend {
            async fn create_lobby(
                &self,
                _name: &str,
                _max_players: usize,
                _options: CreateLobbyOptions,
            ) -> Result<Lobby> {
                unimplemented!()
            }

            async fn query_lobbies(&self, _options: QueryLobbiesOptions) -> Result<QueryResponse> {
                Err(anyhow::anyhow!("service unavailable"))
            }

            async fn join_lobby_by_id(&self, _lobby_id: &str) -> Result<Lobby> {
                unimplemented!()
            }

            async fn join_lobby_by_code(&self, _lobby_code: &str) -> Result<Lobby> {
                unimplemented!()
            }

            async fn remove_player(&self, _lobby_id: &str, _player_id: &str) -> Result<()> {
                unimplemented!()
            }

            async fn create_relay_allocation(
                &self,
                _max_connections: usize,
            ) -> Result<crate::types::Allocation> {
                unimplemented!()
            }

            async fn get_join_code(&self, _allocation_id: &str) -> Result<String> {
                unimplemented!()
            }

            async fn join_relay_allocation(
                &self,
                _join_code: &str,
            ) -> Result<crate::types::Allocation> {
                unimplemented!()
            }
        }

        let directory =
            LobbyDirectory::new(Arc::new(BrokenBackend), DirectoryConfig::default()).unwrap();

        let err = directory.refresh(t(0)).await.unwrap_err();
        match kind(&err) {
            SessionError::Backend { message } => assert!(message.contains("unavailable")),
            other => panic!("expected Backend error, got {other:?}"),
        }

        // Snapshot untouched, limiter not suspended
        assert!(directory.snapshot().is_empty());
        assert!(directory.refresh(t(1)).await.is_err());
        assert_eq!(directory.requests_in_window(t(1)), 2);
    }

    #[tokio::test]
    async fn test_auto_refresh_tick_schedule() {
        let backend = seeded_backend(1).await;
        let config = DirectoryConfig {
            auto_refresh_interval_seconds: 15,
            ..DirectoryConfig::default()
        };
        let directory = LobbyDirectory::new(backend, config).unwrap();

        // Disabled: tick never refreshes
        assert!(directory.auto_refresh_tick(t(0)).await.unwrap().is_none());

        directory.set_auto_refresh(true);
        assert!(directory.auto_refresh_enabled());

        // First tick is due immediately
        let refreshed = directory.auto_refresh_tick(t(1)).await.unwrap();
        assert_eq!(refreshed.map(|l| l.len()), Some(1));

        // Within the interval: skipped, not an error
        assert!(directory.auto_refresh_tick(t(10)).await.unwrap().is_none());

        // Past the interval: refreshes again
        assert!(directory.auto_refresh_tick(t(17)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_tick_clears_cooldown_then_refreshes() {
        let directory = LobbyDirectory::new(
            Arc::new(OverloadedBackend),
            DirectoryConfig {
                cooldown_seconds: 60,
                ..DirectoryConfig::default()
            },
        )
        .unwrap();
        directory.set_auto_refresh(true);

        let err = directory.refresh(t(0)).await.unwrap_err();
        assert!(matches!(kind(&err), SessionError::BackendRateLimited));

        // Suspended: scheduled refreshes skip quietly
        assert!(directory.auto_refresh_tick(t(30)).await.unwrap().is_none());

        // Past the cooldown the tick clears suspension and retries; the
        // backend is still overloaded, so the refresh itself fails again.
        let err = directory.auto_refresh_tick(t(61)).await.unwrap_err();
        assert!(matches!(kind(&err), SessionError::BackendRateLimited));
    }
}
