//! Player identity and anonymous sign-in
//!
//! Components depend only on whether an identity is available; the sign-in
//! handshake itself is the one place in this crate that retries, with a small
//! bounded number of attempts and increasing delay.

use crate::error::{Result, SessionError};
use crate::types::PlayerId;
use crate::utils::generate_entity_id;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// External authentication boundary
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Perform the asynchronous anonymous sign-in, yielding a stable player id
    async fn sign_in_anonymously(&self) -> Result<PlayerId>;
}

/// Read side of the identity: available or not
pub trait IdentityProvider: Send + Sync {
    /// The signed-in player id
    ///
    /// Fails with `NotAuthenticated` before sign-in completes, so callers
    /// never send a malformed request instead.
    fn player_id(&self) -> Result<PlayerId>;

    fn is_authenticated(&self) -> bool;
}

/// Configuration for the sign-in handshake
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Maximum sign-in attempts before surfacing a terminal failure
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt, capped at 30s
    pub retry_delay_ms: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// Anonymous per-process identity with bounded-retry sign-in
pub struct AnonymousIdentity {
    auth: Arc<dyn AuthService>,
    config: IdentityConfig,
    player_id: RwLock<Option<PlayerId>>,
}

impl AnonymousIdentity {
    pub fn new(auth: Arc<dyn AuthService>, config: IdentityConfig) -> Self {
        Self {
            auth,
            config,
            player_id: RwLock::new(None),
        }
    }

    /// Sign in, retrying transient failures with exponential backoff
    ///
    /// Idempotent: a second call returns the already-established identity.
    pub async fn sign_in(&self) -> Result<PlayerId> {
        if let Ok(guard) = self.player_id.read() {
            if let Some(id) = guard.as_ref() {
                return Ok(id.clone());
            }
        }

        let mut attempt = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.auth.sign_in_anonymously().await {
                Ok(id) => {
                    let mut guard = self.player_id.write().map_err(|_| {
                        SessionError::Internal {
                            message: "identity lock poisoned".to_string(),
                        }
                    })?;
                    *guard = Some(id.clone());

                    info!("Signed in anonymously with player id {}", id);
                    return Ok(id);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.config.max_attempts {
                        error!(
                            "Sign-in failed after {} attempts: {}",
                            self.config.max_attempts, e
                        );
                        return Err(e.context("anonymous sign-in exhausted retries"));
                    }

                    warn!(
                        "Sign-in attempt {} failed: {}. Retrying in {:?}",
                        attempt, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(30_000));
                }
            }
        }
    }
}

impl IdentityProvider for AnonymousIdentity {
    fn player_id(&self) -> Result<PlayerId> {
        let guard = self
            .player_id
            .read()
            .map_err(|_| SessionError::Internal {
                message: "identity lock poisoned".to_string(),
            })?;

        guard
            .as_ref()
            .cloned()
            .ok_or_else(|| SessionError::NotAuthenticated.into())
    }

    fn is_authenticated(&self) -> bool {
        self.player_id
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}

/// Auth service that mints a fresh id locally (demo binary, tests)
#[derive(Debug, Default)]
pub struct LocalAuthService;

impl LocalAuthService {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuthService for LocalAuthService {
    async fn sign_in_anonymously(&self) -> Result<PlayerId> {
        Ok(generate_entity_id())
    }
}

/// Already-established identity for tests
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    player_id: PlayerId,
}

impl StaticIdentity {
    pub fn new(player_id: impl Into<PlayerId>) -> Self {
        Self {
            player_id: player_id.into(),
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn player_id(&self) -> Result<PlayerId> {
        Ok(self.player_id.clone())
    }

    fn is_authenticated(&self) -> bool {
        true
    }
}
