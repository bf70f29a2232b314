//! Active session orchestration
//!
//! `SessionOrchestrator` owns the single active session per process: the
//! current lobby plus its relay allocation. It coordinates the create, join,
//! and leave protocols against the backend, exchanging the relay join code
//! through lobby metadata. One operation may be in flight at a time; a call
//! arriving while another is pending fails immediately with `InvalidState`.

use crate::backend::{classify_backend_error, CreateLobbyOptions, SessionBackend};
use crate::error::{Result, SessionError};
use crate::identity::IdentityProvider;
use crate::types::{
    ActiveSession, DataValue, Lobby, RelayRole, SessionPhase, GAME_MODE_KEY, RELAY_JOIN_CODE_KEY,
    VERSION_KEY,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Configuration for session creation
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capacity of lobbies this client creates (also sizes the relay)
    pub max_players: usize,
    /// Public game-mode tag embedded in created lobbies
    pub game_mode: String,
    /// Public version tag embedded in created lobbies
    pub client_version: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_players: 16,
            game_mode: "RockRun".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum SessionState {
    Idle,
    Creating,
    Joining,
    Leaving,
    Hosting(ActiveSession),
    Joined(ActiveSession),
}

impl SessionState {
    fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Idle => SessionPhase::Idle,
            SessionState::Creating => SessionPhase::Creating,
            SessionState::Joining => SessionPhase::Joining,
            SessionState::Leaving => SessionPhase::Leaving,
            SessionState::Hosting(_) => SessionPhase::Hosting,
            SessionState::Joined(_) => SessionPhase::Joined,
        }
    }
}

enum JoinTarget<'a> {
    Id(&'a str),
    Code(&'a str),
}

/// Resets the orchestrator to Idle and releases the in-flight flag on every
/// exit path unless the operation committed its final state first.
struct OpGuard<'a> {
    orchestrator: &'a SessionOrchestrator,
    completed: bool,
}

impl OpGuard<'_> {
    fn complete(&mut self) {
        self.completed = true;
    }
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            if let Ok(mut state) = self.orchestrator.state.lock() {
                *state = SessionState::Idle;
            }
        }
        self.orchestrator.op_in_flight.store(false, Ordering::SeqCst);
    }
}

/// Owner of the single active session
pub struct SessionOrchestrator {
    backend: Arc<dyn SessionBackend>,
    identity: Arc<dyn IdentityProvider>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    op_in_flight: AtomicBool,
}

impl SessionOrchestrator {
    pub fn new(
        backend: Arc<dyn SessionBackend>,
        identity: Arc<dyn IdentityProvider>,
        config: SessionConfig,
    ) -> Self {
        Self {
            backend,
            identity,
            config,
            state: Mutex::new(SessionState::Idle),
            op_in_flight: AtomicBool::new(false),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, SessionState>> {
        self.state.lock().map_err(|_| {
            SessionError::Internal {
                message: "session state lock poisoned".to_string(),
            }
            .into()
        })
    }

    /// Acquire the in-flight flag and move Idle into the given transient state
    fn begin_from_idle(&self, transient: SessionState) -> Result<OpGuard<'_>> {
        if self
            .op_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionError::InvalidState {
                reason: "another session operation is in flight".to_string(),
            }
            .into());
        }
        let guard = OpGuard {
            orchestrator: self,
            completed: false,
        };

        let mut state = self.state()?;
        if matches!(*state, SessionState::Idle) {
            *state = transient;
            Ok(guard)
        } else {
            let reason = format!("session is {}, expected Idle", state.phase());
            drop(state);
            // Keep the existing session untouched
            let mut guard = guard;
            guard.complete();
            Err(SessionError::InvalidState { reason }.into())
        }
    }

    fn set_state(&self, next: SessionState) -> Result<()> {
        *self.state()? = next;
        Ok(())
    }

    /// Observable phase of the session state machine
    pub fn phase(&self) -> SessionPhase {
        self.state
            .lock()
            .map(|state| state.phase())
            .unwrap_or(SessionPhase::Idle)
    }

    /// The held/joined lobby, if any
    pub fn current_lobby(&self) -> Option<Lobby> {
        self.state.lock().ok().and_then(|state| match &*state {
            SessionState::Hosting(session) | SessionState::Joined(session) => {
                Some(session.lobby.clone())
            }
            _ => None,
        })
    }

    /// The full active session (lobby + relay role), if any
    pub fn active_session(&self) -> Option<ActiveSession> {
        self.state.lock().ok().and_then(|state| match &*state {
            SessionState::Hosting(session) | SessionState::Joined(session) => {
                Some(session.clone())
            }
            _ => None,
        })
    }

    fn creation_metadata(&self, relay_join_code: &str) -> HashMap<String, DataValue> {
        let mut metadata = HashMap::new();
        metadata.insert(
            GAME_MODE_KEY.to_string(),
            DataValue::public(self.config.game_mode.clone()),
        );
        metadata.insert(
            RELAY_JOIN_CODE_KEY.to_string(),
            DataValue::member(relay_join_code),
        );
        metadata.insert(
            VERSION_KEY.to_string(),
            DataValue::public(self.config.client_version.clone()),
        );
        metadata
    }

    /// Create a lobby and host its relay allocation
    ///
    /// Allocates a relay sized for the configured capacity, obtains its join
    /// code, then creates the lobby with the code embedded under member-only
    /// visibility. On any failure after allocation the allocation is dropped
    /// from local state; the backend expires unused allocations on its own.
    pub async fn create_lobby(&self, name: &str) -> Result<Lobby> {
        self.identity.player_id()?;
        let mut guard = self.begin_from_idle(SessionState::Creating)?;

        info!(
            "Creating lobby '{}' for up to {} players...",
            name, self.config.max_players
        );

        let allocation = self
            .backend
            .create_relay_allocation(self.config.max_players)
            .await
            .map_err(classify_backend_error)?;

        let join_code = match self.backend.get_join_code(&allocation.id).await {
            Ok(code) => code,
            Err(e) => {
                warn!(
                    "Discarding relay allocation {} after join-code failure",
                    allocation.id
                );
                return Err(classify_backend_error(e).into());
            }
        };

        let options = CreateLobbyOptions {
            is_private: false,
            metadata: self.creation_metadata(&join_code),
        };
        let lobby = match self
            .backend
            .create_lobby(name, self.config.max_players, options)
            .await
        {
            Ok(lobby) => lobby,
            Err(e) => {
                warn!(
                    "Discarding relay allocation {} after lobby creation failure",
                    allocation.id
                );
                return Err(classify_backend_error(e).into());
            }
        };

        info!("Lobby created: {} (id: {})", lobby.name, lobby.id);
        debug!("Relay join code for lobby {}: {}", lobby.id, join_code);

        self.set_state(SessionState::Hosting(ActiveSession {
            lobby: lobby.clone(),
            relay: RelayRole::Host(allocation),
        }))?;
        guard.complete();
        Ok(lobby)
    }

    /// Join a lobby by its opaque identifier
    pub async fn join_by_id(&self, lobby_id: &str) -> Result<Lobby> {
        self.join(JoinTarget::Id(lobby_id)).await
    }

    /// Join a lobby by its shareable code
    pub async fn join_by_code(&self, lobby_code: &str) -> Result<Lobby> {
        self.join(JoinTarget::Code(lobby_code)).await
    }

    /// Shared join protocol: lobby membership, then relay attachment
    ///
    /// A join whose relay step fails is rolled back with a best-effort lobby
    /// leave rather than left half-attached; the caller sees which step
    /// failed (`MissingRelayCode` or `RelayJoinFailed`) and ends up Idle.
    async fn join(&self, target: JoinTarget<'_>) -> Result<Lobby> {
        let player_id = self.identity.player_id()?;
        let mut guard = self.begin_from_idle(SessionState::Joining)?;

        let lobby = match target {
            JoinTarget::Id(id) => {
                info!("Joining lobby by id {}...", id);
                self.backend.join_lobby_by_id(id).await
            }
            JoinTarget::Code(code) => {
                info!("Joining lobby by code {}...", code);
                self.backend.join_lobby_by_code(code).await
            }
        }
        .map_err(classify_backend_error)?;

        let join_code = match lobby.relay_join_code() {
            Some(code) => code.to_string(),
            None => {
                self.rollback_join(&lobby, &player_id).await;
                return Err(SessionError::MissingRelayCode {
                    lobby_id: lobby.id.clone(),
                }
                .into());
            }
        };

        let allocation = match self.backend.join_relay_allocation(&join_code).await {
            Ok(allocation) => allocation,
            Err(e) => {
                self.rollback_join(&lobby, &player_id).await;
                return Err(SessionError::RelayJoinFailed {
                    lobby_id: lobby.id.clone(),
                    message: e.to_string(),
                }
                .into());
            }
        };

        info!("Joined lobby {} (id: {})", lobby.name, lobby.id);

        self.set_state(SessionState::Joined(ActiveSession {
            lobby: lobby.clone(),
            relay: RelayRole::Peer(allocation),
        }))?;
        guard.complete();
        Ok(lobby)
    }

    /// Best-effort lobby leave after a failed join; failures are logged only
    async fn rollback_join(&self, lobby: &Lobby, player_id: &str) {
        if let Err(e) = self.backend.remove_player(&lobby.id, player_id).await {
            warn!(
                "Rollback leave of lobby {} failed: {} (remote membership left to backend reaping)",
                lobby.id, e
            );
        }
    }

    /// Leave the current session
    ///
    /// The remote removal is best-effort: local state is cleared even when
    /// the call fails, because holding stale local session state is worse
    /// than a dangling remote membership the backend will eventually reap.
    pub async fn leave(&self) -> Result<()> {
        if self
            .op_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionError::InvalidState {
                reason: "another session operation is in flight".to_string(),
            }
            .into());
        }
        let mut guard = OpGuard {
            orchestrator: self,
            completed: false,
        };

        let session = {
            let mut state = self.state()?;
            match std::mem::replace(&mut *state, SessionState::Leaving) {
                SessionState::Hosting(session) | SessionState::Joined(session) => session,
                SessionState::Idle => {
                    *state = SessionState::Idle;
                    drop(state);
                    guard.complete();
                    debug!("Leave requested with no active session");
                    return Ok(());
                }
                other => {
                    // Unreachable while the in-flight flag is held
                    *state = other;
                    drop(state);
                    guard.complete();
                    return Err(SessionError::Internal {
                        message: "leave observed a transient session state".to_string(),
                    }
                    .into());
                }
            }
        };

        match self.identity.player_id() {
            Ok(player_id) => {
                if let Err(e) = self
                    .backend
                    .remove_player(&session.lobby.id, &player_id)
                    .await
                {
                    warn!(
                        "Remote removal from lobby {} failed: {} (clearing local session anyway)",
                        session.lobby.id, e
                    );
                }
            }
            Err(_) => {
                warn!(
                    "No identity available for remote removal from lobby {}, clearing local session only",
                    session.lobby.id
                );
            }
        }

        self.set_state(SessionState::Idle)?;
        guard.complete();
        info!("Left lobby {}", session.lobby.id);
        Ok(())
    }
}
