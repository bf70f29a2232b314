//! Utility functions for the session client

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Generate a new unique entity id (lobbies, allocations)
pub fn generate_entity_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a short shareable join code (6 uppercase hex characters)
pub fn generate_join_code() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_uppercase()
}
