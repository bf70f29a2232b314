//! In-memory implementation of the remote session service
//!
//! Faithful to the remote contract: id and join-code generation, open-slot
//! and lock filtering, occupant accounting, and member-visibility stripping
//! on discovery results. Backs the demo binary and the test suites.

use crate::backend::service::{
    CreateLobbyOptions, FilterField, FilterOp, OrderField, QueryFilter, QueryLobbiesOptions,
    QueryOrder,
    QueryResponse, SessionBackend,
};
use crate::error::{Result, SessionError};
use crate::types::{Allocation, Lobby, Visibility};
use crate::utils::{current_timestamp, generate_entity_id, generate_join_code};
use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// A lobby as stored service-side, with fields the wire model does not carry
#[derive(Debug, Clone)]
struct StoredLobby {
    lobby: Lobby,
    is_private: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Lobbies by id
    lobbies: HashMap<String, StoredLobby>,
    /// Lobby code -> lobby id
    lobby_codes: HashMap<String, String>,
    /// Allocation id -> allocated connection count
    allocations: HashMap<String, usize>,
    /// Relay join code -> allocation id
    relay_codes: HashMap<String, String>,
}

/// In-process session service
#[derive(Debug, Default)]
pub struct InMemorySessionBackend {
    state: Mutex<MemoryState>,
}

impl InMemorySessionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| {
            SessionError::Internal {
                message: "backend state lock poisoned".to_string(),
            }
            .into()
        })
    }

    /// Number of lobbies currently stored (diagnostic)
    pub fn lobby_count(&self) -> usize {
        self.state.lock().map(|s| s.lobbies.len()).unwrap_or(0)
    }

    /// Lock or unlock a stored lobby (test hook for discovery filtering)
    pub fn set_locked(&self, lobby_id: &str, locked: bool) -> Result<()> {
        let mut state = self.lock()?;
        let stored = state
            .lobbies
            .get_mut(lobby_id)
            .ok_or_else(|| anyhow!("lobby {lobby_id} not found"))?;
        stored.lobby.is_locked = locked;
        Ok(())
    }

    /// Strip member-visible metadata for callers that are not lobby members
    fn sanitize_for_discovery(lobby: &Lobby) -> Lobby {
        let mut public = lobby.clone();
        public
            .data
            .retain(|_, entry| entry.visibility == Visibility::Public);
        // The shareable code is member-scoped as well
        public.lobby_code = None;
        public
    }

    fn matches_filter(lobby: &Lobby, filter: &QueryFilter) -> Result<bool> {
        match filter.field {
            FilterField::AvailableSlots => {
                let value: usize = filter
                    .value
                    .parse()
                    .map_err(|_| anyhow!("invalid AvailableSlots filter value: {}", filter.value))?;
                Ok(match filter.op {
                    FilterOp::Eq => lobby.available_slots() == value,
                    FilterOp::Gt => lobby.available_slots() > value,
                    FilterOp::Lt => lobby.available_slots() < value,
                })
            }
            FilterField::IsLocked => {
                let value = match filter.value.as_str() {
                    "false" | "0" => false,
                    "true" | "1" => true,
                    other => return Err(anyhow!("invalid IsLocked filter value: {other}")),
                };
                match filter.op {
                    FilterOp::Eq => Ok(lobby.is_locked == value),
                    _ => Err(anyhow!("IsLocked filter only supports Eq")),
                }
            }
        }
    }
}

#[async_trait]
impl SessionBackend for InMemorySessionBackend {
    async fn create_lobby(
        &self,
        name: &str,
        max_players: usize,
        options: CreateLobbyOptions,
    ) -> Result<Lobby> {
        if name.trim().is_empty() {
            return Err(anyhow!("lobby name must not be empty"));
        }
        if max_players == 0 {
            return Err(anyhow!("max players must be greater than 0"));
        }

        let lobby_code = generate_join_code();
        let lobby = Lobby {
            id: generate_entity_id(),
            name: name.to_string(),
            max_players,
            // The creator occupies the first slot
            players: 1,
            is_locked: false,
            lobby_code: Some(lobby_code.clone()),
            created_at: current_timestamp(),
            data: options.metadata,
        };

        let mut state = self.lock()?;
        state.lobby_codes.insert(lobby_code, lobby.id.clone());
        state.lobbies.insert(
            lobby.id.clone(),
            StoredLobby {
                lobby: lobby.clone(),
                is_private: options.is_private,
            },
        );

        debug!("Stored lobby {} ({})", lobby.id, lobby.name);
        Ok(lobby)
    }

    async fn query_lobbies(&self, options: QueryLobbiesOptions) -> Result<QueryResponse> {
        let state = self.lock()?;

        let mut results = Vec::new();
        for stored in state.lobbies.values() {
            if stored.is_private {
                continue;
            }
            let mut include = true;
            for filter in &options.filters {
                if !Self::matches_filter(&stored.lobby, filter)? {
                    include = false;
                    break;
                }
            }
            if include {
                results.push(Self::sanitize_for_discovery(&stored.lobby));
            }
        }

        for order in &options.order {
            match order.field {
                OrderField::Created => {
                    results.sort_by_key(|l| l.created_at);
                    if order.descending {
                        results.reverse();
                    }
                }
            }
        }
        results.truncate(options.count);

        Ok(QueryResponse { results })
    }

    async fn join_lobby_by_id(&self, lobby_id: &str) -> Result<Lobby> {
        let mut state = self.lock()?;
        let stored = state
            .lobbies
            .get_mut(lobby_id)
            .ok_or_else(|| anyhow!("lobby {lobby_id} not found"))?;

        if stored.lobby.is_locked {
            return Err(anyhow!("lobby {lobby_id} is locked"));
        }
        if stored.lobby.available_slots() == 0 {
            return Err(anyhow!("lobby {lobby_id} is full"));
        }

        stored.lobby.players += 1;
        Ok(stored.lobby.clone())
    }

    async fn join_lobby_by_code(&self, lobby_code: &str) -> Result<Lobby> {
        let lobby_id = {
            let state = self.lock()?;
            state
                .lobby_codes
                .get(lobby_code)
                .cloned()
                .ok_or_else(|| anyhow!("no lobby for code {lobby_code}"))?
        };
        self.join_lobby_by_id(&lobby_id).await
    }

    async fn remove_player(&self, lobby_id: &str, _player_id: &str) -> Result<()> {
        let mut state = self.lock()?;
        let stored = state
            .lobbies
            .get_mut(lobby_id)
            .ok_or_else(|| anyhow!("lobby {lobby_id} not found"))?;

        stored.lobby.players = stored.lobby.players.saturating_sub(1);

        // Empty lobbies are reaped, along with their shareable code
        if stored.lobby.players == 0 {
            let code = stored.lobby.lobby_code.clone();
            state.lobbies.remove(lobby_id);
            if let Some(code) = code {
                state.lobby_codes.remove(&code);
            }
            debug!("Reaped empty lobby {lobby_id}");
        }
        Ok(())
    }

    async fn create_relay_allocation(&self, max_connections: usize) -> Result<Allocation> {
        if max_connections == 0 {
            return Err(anyhow!("max connections must be greater than 0"));
        }

        let allocation = Allocation {
            id: generate_entity_id(),
        };
        let mut state = self.lock()?;
        state
            .allocations
            .insert(allocation.id.clone(), max_connections);
        Ok(allocation)
    }

    async fn get_join_code(&self, allocation_id: &str) -> Result<String> {
        let mut state = self.lock()?;
        if !state.allocations.contains_key(allocation_id) {
            return Err(anyhow!("allocation {allocation_id} not found"));
        }

        let code = generate_join_code();
        state
            .relay_codes
            .insert(code.clone(), allocation_id.to_string());
        Ok(code)
    }

    async fn join_relay_allocation(&self, join_code: &str) -> Result<Allocation> {
        let state = self.lock()?;
        let allocation_id = state
            .relay_codes
            .get(join_code)
            .cloned()
            .ok_or_else(|| anyhow!("invalid relay join code {join_code}"))?;
        Ok(Allocation { id: allocation_id })
    }
}
