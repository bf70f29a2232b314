//! Demo entry point for the summit-session client core
//!
//! Drives the complete matchmaking flow against the in-process backend:
//! anonymous sign-in, lobby creation with relay allocation, directory
//! browsing, join-by-code from a second client, and teardown. Useful for
//! exercising the library end to end without a cloud deployment.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use summit_session::backend::InMemorySessionBackend;
use summit_session::config::AppConfig;
use summit_session::identity::{AnonymousIdentity, LocalAuthService};
use summit_session::utils::current_timestamp;
use summit_session::{LobbyDirectory, SessionOrchestrator, SessionPhase};
use tracing::info;

/// Summit Session - matchmaking session client core for Summit Sprint
#[derive(Parser)]
#[command(
    name = "summit-session",
    version,
    about = "Rate-limited lobby discovery and relay session orchestration",
    long_about = "Summit Session is the matchmaking core of the Summit Sprint client: \
                 it discovers lobbies with client-side rate limiting, creates and joins \
                 sessions, and exchanges relay join codes through lobby metadata. This \
                 binary runs the full flow against an in-process backend."
)]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Name of the lobby the demo host creates
    #[arg(long, default_value = "Peak Party")]
    lobby_name: String,

    /// Override lobby capacity
    #[arg(long, value_name = "N")]
    max_players: Option<usize>,

    /// Print the browsed lobby list as JSON
    #[arg(long)]
    json: bool,

    /// Validate configuration and exit without running the demo
    #[arg(long)]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Load and merge configuration from file/environment and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }
    if let Some(max_players) = args.max_players {
        config.session.max_players = max_players;
    }

    Ok(config)
}

fn display_startup_banner(config: &AppConfig) {
    info!("Summit Session demo client");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Game mode: {}", config.session.game_mode);
    info!("   Lobby capacity: {}", config.session.max_players);
    info!(
        "   Request budget: {}/min, cooldown {}s",
        config.rate_limit.max_requests_per_minute, config.rate_limit.cooldown_seconds
    );
}

/// Run the full create/browse/join/leave flow against one shared backend
async fn run_demo(config: AppConfig, args: &Args) -> Result<()> {
    let backend = Arc::new(InMemorySessionBackend::new());

    // Host client signs in and creates a lobby
    let host_identity = Arc::new(AnonymousIdentity::new(
        Arc::new(LocalAuthService::new()),
        config.identity_config(),
    ));
    host_identity.sign_in().await?;

    let host = SessionOrchestrator::new(
        backend.clone(),
        host_identity.clone(),
        config.session_config(),
    );
    let lobby = host.create_lobby(&args.lobby_name).await?;
    let lobby_code = lobby
        .lobby_code
        .clone()
        .ok_or_else(|| anyhow::anyhow!("created lobby carries no shareable code"))?;
    info!(
        "Hosting '{}' (id {}, code {})",
        lobby.name, lobby.id, lobby_code
    );

    // A second client browses the directory and joins by code
    let directory = LobbyDirectory::new(backend.clone(), config.directory_config())?;
    let browsed = directory.refresh(current_timestamp()).await?;
    info!(
        "Directory shows {} open lobb{}",
        browsed.len(),
        if browsed.len() == 1 { "y" } else { "ies" }
    );
    if args.json {
        println!("{}", serde_json::to_string_pretty(&browsed)?);
    }

    let joiner_identity = Arc::new(AnonymousIdentity::new(
        Arc::new(LocalAuthService::new()),
        config.identity_config(),
    ));
    joiner_identity.sign_in().await?;

    let joiner =
        SessionOrchestrator::new(backend.clone(), joiner_identity, config.session_config());
    let joined = joiner.join_by_code(&lobby_code).await?;
    info!(
        "Second client joined '{}' ({} of {} slots filled)",
        joined.name, joined.players, joined.max_players
    );
    assert_eq!(joiner.phase(), SessionPhase::Joined);

    // Teardown
    joiner.leave().await?;
    host.leave().await?;

    let remaining = directory.refresh(current_timestamp()).await?;
    info!(
        "Demo complete: {} lobbies remain, {} requests used this minute",
        remaining.len(),
        directory.requests_in_window(current_timestamp())
    );

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    display_startup_banner(&config);

    if args.dry_run {
        info!("Configuration validation successful");
        info!("Dry run completed - exiting without running the demo");
        return Ok(());
    }

    run_demo(config, &args).await
}
