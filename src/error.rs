//! Error types for the session client
//!
//! This module defines all error types using anyhow for consistent error
//! handling throughout the crate.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific session scenarios
///
/// None of these are fatal: every failure leaves the owning component in a
/// well-defined state, ready for a subsequent call.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Local admission control denied the request before any remote call
    #[error("request denied by local rate limiter")]
    RateLimited,

    /// The backend itself signaled overload; cooldown has been entered
    #[error("backend signaled rate limit, requests suspended")]
    BackendRateLimited,

    /// Any other remote failure, carrying the backend's message
    #[error("backend error: {message}")]
    Backend { message: String },

    /// Operation invoked while a conflicting operation is in flight or the
    /// session is in an incompatible state
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },

    /// Joined lobby metadata lacked the embedded relay join code
    #[error("lobby {lobby_id} has no embedded relay join code")]
    MissingRelayCode { lobby_id: String },

    /// An identity-requiring call was made before sign-in completed
    #[error("not authenticated")]
    NotAuthenticated,

    /// Lobby join succeeded but the relay step failed; the join was rolled back
    #[error("relay join failed for lobby {lobby_id}: {message}")]
    RelayJoinFailed { lobby_id: String, message: String },

    /// Misconfiguration detected at construction or load time
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Internal invariant failure (poisoned lock, impossible state)
    #[error("internal error: {message}")]
    Internal { message: String },
}
