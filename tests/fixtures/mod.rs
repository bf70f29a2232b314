//! Shared test fixtures for integration tests

use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use summit_session::backend::{
    CreateLobbyOptions, InMemorySessionBackend, QueryLobbiesOptions, QueryResponse, SessionBackend,
};
use summit_session::directory::DirectoryObserver;
use summit_session::types::{Allocation, DataValue, Lobby, GAME_MODE_KEY, RELAY_JOIN_CODE_KEY};
use summit_session::Result;
use tokio::sync::Notify;

/// In-memory backend with call counting and scriptable failure points
#[derive(Default)]
pub struct InstrumentedBackend {
    inner: InMemorySessionBackend,
    pub query_calls: AtomicUsize,
    queued_query_failure: Mutex<Option<String>>,
    pub fail_remove_player: AtomicBool,
    pub hold_relay_allocation: AtomicBool,
    pub release: Notify,
}

impl InstrumentedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queries(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn fail_next_query(&self, message: &str) {
        *self.queued_query_failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn lobby_count(&self) -> usize {
        self.inner.lobby_count()
    }

    /// Seed a joinable lobby directly, optionally without a relay join code
    pub async fn seed_lobby(&self, name: &str, with_relay_code: bool) -> Lobby {
        let mut metadata = HashMap::new();
        metadata.insert(GAME_MODE_KEY.to_string(), DataValue::public("RockRun"));
        if with_relay_code {
            let allocation = self.inner.create_relay_allocation(4).await.unwrap();
            let code = self.inner.get_join_code(&allocation.id).await.unwrap();
            metadata.insert(RELAY_JOIN_CODE_KEY.to_string(), DataValue::member(code));
        }
        self.inner
            .create_lobby(
                name,
                4,
                CreateLobbyOptions {
                    is_private: false,
                    metadata,
                },
            )
            .await
            .unwrap()
    }
}

#[async_trait]
impl SessionBackend for InstrumentedBackend {
    async fn create_lobby(
        &self,
        name: &str,
        max_players: usize,
        options: CreateLobbyOptions,
    ) -> Result<Lobby> {
        self.inner.create_lobby(name, max_players, options).await
    }

    async fn query_lobbies(&self, options: QueryLobbiesOptions) -> Result<QueryResponse> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.queued_query_failure.lock().unwrap().take() {
            return Err(anyhow!(message));
        }
        self.inner.query_lobbies(options).await
    }

    async fn join_lobby_by_id(&self, lobby_id: &str) -> Result<Lobby> {
        self.inner.join_lobby_by_id(lobby_id).await
    }

    async fn join_lobby_by_code(&self, lobby_code: &str) -> Result<Lobby> {
        self.inner.join_lobby_by_code(lobby_code).await
    }

    async fn remove_player(&self, lobby_id: &str, player_id: &str) -> Result<()> {
        if self.fail_remove_player.load(Ordering::SeqCst) {
            return Err(anyhow!("removal rejected"));
        }
        self.inner.remove_player(lobby_id, player_id).await
    }

    async fn create_relay_allocation(&self, max_connections: usize) -> Result<Allocation> {
        if self.hold_relay_allocation.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        self.inner.create_relay_allocation(max_connections).await
    }

    async fn get_join_code(&self, allocation_id: &str) -> Result<String> {
        self.inner.get_join_code(allocation_id).await
    }

    async fn join_relay_allocation(&self, join_code: &str) -> Result<Allocation> {
        self.inner.join_relay_allocation(join_code).await
    }
}

/// Observer that records every snapshot it receives
#[derive(Default)]
pub struct RecordingObserver {
    pub updates: AtomicUsize,
    pub last_snapshot: Mutex<Vec<Lobby>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn last_lobby_names(&self) -> Vec<String> {
        self.last_snapshot
            .lock()
            .unwrap()
            .iter()
            .map(|l| l.name.clone())
            .collect()
    }
}

#[async_trait]
impl DirectoryObserver for RecordingObserver {
    async fn lobbies_updated(&self, lobbies: &[Lobby]) {
        self.updates.fetch_add(1, Ordering::SeqCst);
        *self.last_snapshot.lock().unwrap() = lobbies.to_vec();
    }
}
