//! HTTP route definitions

use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::app::AppState;
use crate::clock::DriftStats;
use crate::replay::StorageStats;
use crate::timesync::ActiveSession;
use crate::util::time::uptime_secs;
use crate::ws::handler::{timesync_handler, ws_handler};

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/timesync", get(timesync_handler))
        .route("/timesync/sessions", get(sessions_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    world_id: String,
    simulated_ms: i64,
    world_subscribers: usize,
    time_sync_enabled: bool,
    time_sync_sessions: usize,
    drift: DriftStats,
    replay_storage: Option<StorageStats>,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        world_id: state.world.id.to_string(),
        simulated_ms: state.clock.simulated_ms(),
        world_subscribers: state.world.diff_tx.receiver_count(),
        time_sync_enabled: state.time_sync.is_some(),
        time_sync_sessions: state
            .time_sync
            .as_ref()
            .map(|service| service.session_count())
            .unwrap_or(0),
        drift: state.clock.drift_stats(),
        replay_storage: state.replay_cleaner.as_ref().map(|cleaner| cleaner.stats()),
    })
}

// ============================================================================
// Time sync sessions
// ============================================================================

async fn sessions_handler(State(state): State<AppState>) -> Json<Vec<ActiveSession>> {
    let sessions = state
        .time_sync
        .as_ref()
        .map(|service| service.active_sessions())
        .unwrap_or_default();
    Json(sessions)
}
