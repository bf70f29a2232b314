//! Abstract boundary with the remote session service
//!
//! The core treats the backend as a black box reached over authenticated RPC:
//! it can fail, time out, or reject due to rate limiting. All calls are
//! asynchronous and carry a human-readable message on failure; the only
//! structure the core reads out of an error is the rate-limit signal.

use crate::error::{Result, SessionError};
use crate::types::{Allocation, DataValue, Lobby};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lobby fields a discovery query can filter on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterField {
    AvailableSlots,
    IsLocked,
}

/// Comparison operators available to query filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    Eq,
    Gt,
    Lt,
}

/// A single (field, op, value) discovery filter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryFilter {
    pub field: FilterField,
    pub op: FilterOp,
    pub value: String,
}

impl QueryFilter {
    pub fn new(field: FilterField, op: FilterOp, value: impl Into<String>) -> Self {
        Self {
            field,
            op,
            value: value.into(),
        }
    }
}

/// Lobby fields results can be ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderField {
    Created,
}

/// A single ordering directive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOrder {
    pub field: OrderField,
    pub descending: bool,
}

/// Options for a lobby discovery query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLobbiesOptions {
    /// Maximum number of results to return
    pub count: usize,
    pub filters: Vec<QueryFilter>,
    pub order: Vec<QueryOrder>,
}

/// Response to a lobby discovery query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<Lobby>,
}

/// Options for lobby creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLobbyOptions {
    pub is_private: bool,
    pub metadata: HashMap<String, DataValue>,
}

/// The remote session service RPC surface
///
/// Implementations wrap whatever transport the deployment uses; the in-memory
/// implementation in this crate backs tests and the demo binary.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Create a lobby owned by the calling player
    async fn create_lobby(
        &self,
        name: &str,
        max_players: usize,
        options: CreateLobbyOptions,
    ) -> Result<Lobby>;

    /// Query discoverable lobbies
    async fn query_lobbies(&self, options: QueryLobbiesOptions) -> Result<QueryResponse>;

    /// Join a lobby by its opaque identifier
    async fn join_lobby_by_id(&self, lobby_id: &str) -> Result<Lobby>;

    /// Join a lobby by its shareable code
    async fn join_lobby_by_code(&self, lobby_code: &str) -> Result<Lobby>;

    /// Remove a player from a lobby
    async fn remove_player(&self, lobby_id: &str, player_id: &str) -> Result<()>;

    /// Allocate a relay slot sized for `max_connections` peers
    async fn create_relay_allocation(&self, max_connections: usize) -> Result<Allocation>;

    /// Obtain the shareable join code for an existing allocation
    async fn get_join_code(&self, allocation_id: &str) -> Result<String>;

    /// Join an existing relay allocation via its join code
    async fn join_relay_allocation(&self, join_code: &str) -> Result<Allocation>;
}

/// Whether a backend error message is a rate-limit rejection
///
/// Case-insensitive substring match is the only signal the boundary offers.
/// Isolated here so a structured error code can replace it in one place.
pub fn is_rate_limit_signal(message: &str) -> bool {
    message.to_lowercase().contains("rate limit")
}

/// Map a raw backend failure into the session error taxonomy
pub fn classify_backend_error(err: anyhow::Error) -> SessionError {
    let message = err.to_string();
    if is_rate_limit_signal(&message) {
        SessionError::BackendRateLimited
    } else {
        SessionError::Backend { message }
    }
}
