//! Operational status

use crate::models::StatusResponse;
use crate::state::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/registry/status", get(registry_status))
}

/// Registry counts, self-preservation state and per-peer replication figures
///
/// GET /v1/registry/status
async fn registry_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        registry: state.registry().stats(),
        peers: state.peer_stats(),
        uptime_seconds: state.uptime_seconds(),
    })
}
