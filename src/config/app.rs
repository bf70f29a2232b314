//! Main application configuration
//!
//! Defines the primary configuration structures for the summit-session
//! client, including environment variable loading, TOML file loading, and
//! validation.

use crate::directory::DirectoryConfig;
use crate::identity::IdentityConfig;
use crate::session::SessionConfig;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub directory: DirectorySettings,
    pub rate_limit: RateLimitSettings,
    pub session: SessionSettings,
    pub identity: IdentitySettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Lobby discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySettings {
    /// Result cap for discovery queries
    pub max_results: usize,
    /// Seconds between automatic refreshes
    pub auto_refresh_interval_seconds: i64,
    /// Whether auto-refresh starts enabled
    pub auto_refresh: bool,
}

/// Outbound request budget settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Requests admitted per sliding minute
    pub max_requests_per_minute: usize,
    /// Cooldown after a backend-signaled rate limit, in seconds
    pub cooldown_seconds: i64,
}

/// Session creation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Capacity of lobbies this client creates
    pub max_players: usize,
    /// Public game-mode tag for created lobbies
    pub game_mode: String,
    /// Public version tag for created lobbies
    pub client_version: String,
}

/// Sign-in handshake settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySettings {
    /// Maximum sign-in attempts before a terminal failure
    pub max_sign_in_attempts: u32,
    /// Delay before the first sign-in retry, in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "summit-session".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            max_results: 25,
            auto_refresh_interval_seconds: 15,
            // Idle clients do not poll unless explicitly enabled
            auto_refresh: false,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 30,
            cooldown_seconds: 60,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_players: 16,
            game_mode: "RockRun".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            max_sign_in_attempts: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            config.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.service.log_level = log_level;
        }

        // Directory settings
        if let Ok(max_results) = env::var("DIRECTORY_MAX_RESULTS") {
            config.directory.max_results = max_results
                .parse()
                .map_err(|_| anyhow!("Invalid DIRECTORY_MAX_RESULTS value: {}", max_results))?;
        }
        if let Ok(interval) = env::var("AUTO_REFRESH_INTERVAL_SECONDS") {
            config.directory.auto_refresh_interval_seconds = interval.parse().map_err(|_| {
                anyhow!("Invalid AUTO_REFRESH_INTERVAL_SECONDS value: {}", interval)
            })?;
        }
        if let Ok(enabled) = env::var("AUTO_REFRESH_ENABLED") {
            config.directory.auto_refresh = enabled
                .parse()
                .map_err(|_| anyhow!("Invalid AUTO_REFRESH_ENABLED value: {}", enabled))?;
        }

        // Rate limit settings
        if let Ok(max_requests) = env::var("MAX_REQUESTS_PER_MINUTE") {
            config.rate_limit.max_requests_per_minute = max_requests
                .parse()
                .map_err(|_| anyhow!("Invalid MAX_REQUESTS_PER_MINUTE value: {}", max_requests))?;
        }
        if let Ok(cooldown) = env::var("RATE_LIMIT_COOLDOWN_SECONDS") {
            config.rate_limit.cooldown_seconds = cooldown.parse().map_err(|_| {
                anyhow!("Invalid RATE_LIMIT_COOLDOWN_SECONDS value: {}", cooldown)
            })?;
        }

        // Session settings
        if let Ok(max_players) = env::var("SESSION_MAX_PLAYERS") {
            config.session.max_players = max_players
                .parse()
                .map_err(|_| anyhow!("Invalid SESSION_MAX_PLAYERS value: {}", max_players))?;
        }
        if let Ok(game_mode) = env::var("GAME_MODE") {
            config.session.game_mode = game_mode;
        }

        // Identity settings
        if let Ok(attempts) = env::var("SIGN_IN_MAX_ATTEMPTS") {
            config.identity.max_sign_in_attempts = attempts
                .parse()
                .map_err(|_| anyhow!("Invalid SIGN_IN_MAX_ATTEMPTS value: {}", attempts))?;
        }
        if let Ok(delay) = env::var("SIGN_IN_RETRY_DELAY_MS") {
            config.identity.retry_delay_ms = delay
                .parse()
                .map_err(|_| anyhow!("Invalid SIGN_IN_RETRY_DELAY_MS value: {}", delay))?;
        }

        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        validate_config(&config)?;
        Ok(config)
    }

    /// Get the auto-refresh interval as a Duration
    pub fn auto_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.directory.auto_refresh_interval_seconds.max(0) as u64)
    }

    /// Get the sign-in retry delay as a Duration
    pub fn sign_in_retry_delay(&self) -> Duration {
        Duration::from_millis(self.identity.retry_delay_ms)
    }

    /// Directory component configuration
    pub fn directory_config(&self) -> DirectoryConfig {
        DirectoryConfig {
            max_results: self.directory.max_results,
            auto_refresh_interval_seconds: self.directory.auto_refresh_interval_seconds,
            auto_refresh: self.directory.auto_refresh,
            max_requests_per_minute: self.rate_limit.max_requests_per_minute,
            cooldown_seconds: self.rate_limit.cooldown_seconds,
        }
    }

    /// Session orchestrator configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_players: self.session.max_players,
            game_mode: self.session.game_mode.clone(),
            client_version: self.session.client_version.clone(),
        }
    }

    /// Identity sign-in configuration
    pub fn identity_config(&self) -> IdentityConfig {
        IdentityConfig {
            max_attempts: self.identity.max_sign_in_attempts,
            retry_delay_ms: self.identity.retry_delay_ms,
        }
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    // Validate directory settings
    if config.directory.max_results == 0 {
        return Err(anyhow!("Directory max results must be greater than 0"));
    }
    if config.directory.auto_refresh_interval_seconds <= 0 {
        return Err(anyhow!("Auto refresh interval must be greater than 0"));
    }

    // Validate rate limit settings
    if config.rate_limit.max_requests_per_minute == 0 {
        return Err(anyhow!("Max requests per minute must be greater than 0"));
    }
    if config.rate_limit.cooldown_seconds <= 0 {
        return Err(anyhow!("Rate limit cooldown must be greater than 0"));
    }

    // Validate session settings
    if config.session.max_players == 0 {
        return Err(anyhow!("Session max players must be greater than 0"));
    }
    if config.session.game_mode.is_empty() {
        return Err(anyhow!("Game mode cannot be empty"));
    }

    // Validate identity settings
    if config.identity.max_sign_in_attempts == 0 {
        return Err(anyhow!("Sign-in attempts must be greater than 0"));
    }

    Ok(())
}
