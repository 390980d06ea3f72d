//! Drift Sync Server - authoritative simulation with time sync streaming
//!
//! This is the main entry point for the server. It handles:
//! - The authoritative tick loop, optional replay recording and retention
//! - WebSocket world diff streaming
//! - WebSocket time sync streaming

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use drift_sync_server::app::AppState;
use drift_sync_server::clock::SimulationClock;
use drift_sync_server::config::Config;
use drift_sync_server::game::GameWorld;
use drift_sync_server::http::build_router;
use drift_sync_server::util::time::init_server_time;

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

    info!("Starting Drift Sync Server");
    info!("Server address: {}", config.server_addr);

    // Start the authoritative world
    let clock = Arc::new(SimulationClock::new(config.drift_warn_threshold_ms));
    let (world, world_handle) = GameWorld::new(config.world_settings(), clock.clone());
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let world_task = tokio::spawn(world.run(async move {
        let _ = stop_rx.changed().await;
    }));

    // Create application state
    let state = AppState::new(config.clone(), clock, world_handle);

    // Prune recorded matches in the background
    let cleaner_task = state.replay_cleaner.clone().map(|cleaner| {
        let mut stop_rx = stop_tx.subscribe();
        tokio::spawn(cleaner.run(config.replay_sweep_interval(), async move {
            let _ = stop_rx.changed().await;
        }))
    });

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);
    info!("Time sync endpoint: ws://{}/timesync", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the tick loop, which flushes the replay recording, and the cleaner
    let _ = stop_tx.send(true);
    world_task.await?;
    if let Some(task) = cleaner_task {
        task.await?;
    }

    info!("Server shutdown complete");
    Ok(())
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
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
