//! Arena Survival Server - authoritative two-player wave survival
//!
//! Hosts a single cooperative match session:
//! - WebSocket connections for lobby, input and state replication
//! - Fixed-rate simulation of players, enemies, projectiles and waves
//! - Highscore submission to an external REST backend

mod app;
mod config;
mod game;
mod http;
mod store;
mod util;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::game::GameMatch;
use crate::http::build_router;
use crate::store::{HighscoreStore, MemoryHighscoreStore, RestHighscoreStore};
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Arena Survival Server");
    info!("Server address: {}", config.server_addr);

    let rules = config.load_game_config()?;
    info!(
        enemy_types = rules.enemy_types.len(),
        spawn_points = rules.spawn_points.len(),
        "Game rules loaded"
    );

    let highscores = highscore_store(&config);

    // Spawn the match task
    let (game_match, match_handle) = GameMatch::new(Arc::new(rules), highscores.clone());
    info!(match_id = %match_handle.id, "Match session created");
    tokio::spawn(game_match.run());

    let addr: SocketAddr = config.server_addr;
    let state = AppState::new(config, match_handle, highscores);

    // Build router
    let router = build_router(state);

    // Start server
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// REST backend when configured, in-process leaderboard otherwise
fn highscore_store(config: &Config) -> Arc<dyn HighscoreStore> {
    match (&config.highscore_url, &config.highscore_api_key) {
        (Some(url), Some(key)) => {
            info!(url = %url, "Using REST highscore backend");
            Arc::new(RestHighscoreStore::new(url, key))
        }
        _ => {
            info!("No highscore backend configured, keeping scores in memory");
            Arc::new(MemoryHighscoreStore::new())
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
