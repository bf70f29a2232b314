//! Remote session service boundary and implementations
//!
//! `service` defines the abstract RPC contract the core depends on; `memory`
//! provides the in-process implementation used by tests and the demo binary.

pub mod memory;
pub mod service;

// Re-export commonly used types
pub use memory::InMemorySessionBackend;
pub use service::{
    classify_backend_error, is_rate_limit_signal, CreateLobbyOptions, FilterField, FilterOp,
    OrderField, QueryFilter, QueryLobbiesOptions, QueryOrder, QueryResponse, SessionBackend,
};
