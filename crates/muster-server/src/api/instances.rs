//! Client-facing registry endpoints
//!
//! TigerStyle: Parse at the edge, validate in the registry.

use crate::api::ApiError;
use crate::models::{
    CancelResponse, FeedQuery, InstancesResponse, LeaseResponse, RegisterInstanceBody,
    RenewQuery, StatusUpdateRequest,
};
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use muster_registry::{FeedResponse, InstanceRecord, InstanceStatus};
use tracing::instrument;

/// Create instance routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/apps", get(query_all))
        .route("/v1/apps/:service", post(register).get(query))
        .route(
            "/v1/apps/:service/:instance_id",
            put(renew).delete(cancel).get(get_instance),
        )
        .route("/v1/apps/:service/:instance_id/status", put(update_status))
}

fn parse_status(raw: &str) -> Result<InstanceStatus, ApiError> {
    raw.parse::<InstanceStatus>().map_err(ApiError::from)
}

/// Register or refresh an instance
///
/// POST /v1/apps/:service
#[instrument(skip(state, body), fields(service = %service), level = "info")]
async fn register(
    State(state): State<AppState>,
    Path(service): Path<String>,
    body: Result<Json<RegisterInstanceBody>, JsonRejection>,
) -> Result<Json<LeaseResponse>, ApiError> {
    let Json(body) = body?;
    if let Some(named) = body.service_name.as_deref() {
        if !named.eq_ignore_ascii_case(&service) {
            return Err(ApiError::bad_request(format!(
                "service_name '{}' does not match path '{}'",
                named, service
            )));
        }
    }

    let record = state.registry().register(body.into_request(&service))?;
    Ok(Json(LeaseResponse {
        ok: true,
        lease: record.lease,
    }))
}

/// Renew a lease, optionally reporting status
///
/// PUT /v1/apps/:service/:instance_id
#[instrument(skip(state, query), level = "debug")]
async fn renew(
    State(state): State<AppState>,
    Path((service, instance_id)): Path<(String, String)>,
    Query(query): Query<RenewQuery>,
) -> Result<Json<LeaseResponse>, ApiError> {
    let status = query.status.as_deref().map(parse_status).transpose()?;
    let lease = state.registry().renew(&service, &instance_id, status)?;
    Ok(Json(LeaseResponse { ok: true, lease }))
}

/// Remove an instance; idempotent
///
/// DELETE /v1/apps/:service/:instance_id
#[instrument(skip(state), level = "info")]
async fn cancel(
    State(state): State<AppState>,
    Path((service, instance_id)): Path<(String, String)>,
) -> Result<Json<CancelResponse>, ApiError> {
    let removed = state.registry().cancel(&service, &instance_id)?;
    Ok(Json(CancelResponse { ok: true, removed }))
}

/// Operator status override
///
/// PUT /v1/apps/:service/:instance_id/status
#[instrument(skip(state, request), level = "info")]
async fn update_status(
    State(state): State<AppState>,
    Path((service, instance_id)): Path<(String, String)>,
    request: Result<Json<StatusUpdateRequest>, JsonRejection>,
) -> Result<Json<InstanceRecord>, ApiError> {
    let Json(request) = request?;
    let status = parse_status(&request.status)?;
    let record = state
        .registry()
        .update_status(&service, &instance_id, status)?;
    Ok(Json(record))
}

/// Instances of one service
///
/// GET /v1/apps/:service
#[instrument(skip(state), level = "debug")]
async fn query(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<InstancesResponse>, ApiError> {
    let instances = state.registry().query(&service)?;
    Ok(Json(InstancesResponse {
        service: service.to_ascii_lowercase(),
        instances,
    }))
}

/// One instance with its lease
///
/// GET /v1/apps/:service/:instance_id
#[instrument(skip(state), level = "debug")]
async fn get_instance(
    State(state): State<AppState>,
    Path((service, instance_id)): Path<(String, String)>,
) -> Result<Json<InstanceRecord>, ApiError> {
    Ok(Json(state.registry().get_instance(&service, &instance_id)?))
}

/// Full snapshot or delta for client caches
///
/// GET /v1/apps[?since_version=V]
#[instrument(skip(state, query), fields(since_version = ?query.since_version), level = "debug")]
async fn query_all(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Json<FeedResponse> {
    Json(state.registry().query_all(query.since_version))
}
