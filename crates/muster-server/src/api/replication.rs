//! Peer replication intake
//!
//! Events arrive already stamped by their origin node. They are applied
//! last-write-wins and never forwarded.

use crate::state::AppState;
use crate::api::ApiError;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use muster_cluster::{ReplicationAck, REPLICATE_PATH};
use muster_registry::ReplicationEvent;
use tracing::{debug, instrument};

pub fn router() -> Router<AppState> {
    Router::new().route(REPLICATE_PATH, post(replicate))
}

/// POST /v1/peers/replicate
#[instrument(skip(state, event), level = "debug")]
async fn replicate(
    State(state): State<AppState>,
    event: Result<Json<ReplicationEvent>, JsonRejection>,
) -> Result<Json<ReplicationAck>, ApiError> {
    let Json(event) = event?;
    debug!(
        origin = %event.origin_node,
        key = %event.key(),
        action = event.action.name(),
        "replication event received"
    );

    let registry = state.registry();
    let outcome = registry.apply_replicated(event);
    Ok(Json(ReplicationAck {
        node_id: registry.node_id().clone(),
        outcome,
    }))
}
