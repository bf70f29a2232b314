//! Common types used throughout the session client

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for players
pub type PlayerId = String;

/// Opaque backend-assigned lobby identifier
pub type LobbyId = String;

/// Opaque backend-assigned relay allocation identifier
pub type AllocationId = String;

/// Metadata key for the game mode tag (public visibility)
pub const GAME_MODE_KEY: &str = "gameMode";

/// Metadata key for the embedded relay join code (member visibility)
pub const RELAY_JOIN_CODE_KEY: &str = "relayJoinCode";

/// Metadata key for the client version tag (public visibility)
pub const VERSION_KEY: &str = "version";

/// Who can read a metadata entry on a lobby
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    /// Readable by anyone browsing the lobby list
    Public,
    /// Readable only by lobby members
    Member,
}

/// A visibility-tagged metadata value stored on a lobby
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataValue {
    pub visibility: Visibility,
    pub value: String,
}

impl DataValue {
    pub fn public(value: impl Into<String>) -> Self {
        Self {
            visibility: Visibility::Public,
            value: value.into(),
        }
    }

    pub fn member(value: impl Into<String>) -> Self {
        Self {
            visibility: Visibility::Member,
            value: value.into(),
        }
    }
}

/// A discoverable matchmaking lobby as reported by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lobby {
    pub id: LobbyId,
    pub name: String,
    /// Maximum number of occupants (always positive)
    pub max_players: usize,
    /// Current occupant count (never exceeds `max_players`)
    pub players: usize,
    pub is_locked: bool,
    /// Shareable lobby code, present for lobbies the caller may join by code
    pub lobby_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub data: HashMap<String, DataValue>,
}

impl Lobby {
    /// Open-slot count (capacity minus occupants)
    pub fn available_slots(&self) -> usize {
        self.max_players.saturating_sub(self.players)
    }

    /// Whether the lobby should appear in discovery results
    pub fn is_open(&self) -> bool {
        !self.is_locked && self.available_slots() > 0
    }

    /// The embedded relay join code, if present in metadata
    pub fn relay_join_code(&self) -> Option<&str> {
        self.data.get(RELAY_JOIN_CODE_KEY).map(|d| d.value.as_str())
    }

    /// The public game-mode tag, if present in metadata
    pub fn game_mode(&self) -> Option<&str> {
        self.data.get(GAME_MODE_KEY).map(|d| d.value.as_str())
    }
}

/// A backend-brokered relay connection slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
}

/// The local process's role on the relay for the active session
///
/// A host allocation (we created the lobby) and a peer allocation (we joined
/// an existing one) are mutually exclusive by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayRole {
    Host(Allocation),
    Peer(Allocation),
}

impl RelayRole {
    pub fn allocation(&self) -> &Allocation {
        match self {
            RelayRole::Host(a) | RelayRole::Peer(a) => a,
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, RelayRole::Host(_))
    }
}

/// The lobby and relay allocation held while a session is active
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub lobby: Lobby,
    pub relay: RelayRole,
}

/// Observable phase of the session orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    Idle,
    Creating,
    Hosting,
    Joining,
    Joined,
    Leaving,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "Idle"),
            SessionPhase::Creating => write!(f, "Creating"),
            SessionPhase::Hosting => write!(f, "Hosting"),
            SessionPhase::Joining => write!(f, "Joining"),
            SessionPhase::Joined => write!(f, "Joined"),
            SessionPhase::Leaving => write!(f, "Leaving"),
        }
    }
}
