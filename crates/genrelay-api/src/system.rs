// Pool observability and housekeeping routes

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use genrelay_core::{AggregateSnapshot, TaskItem};

use crate::common::pool_error_status;
use crate::state::AppState;

/// Create system routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/system/pools", get(pool_status))
        .route("/v1/system/cleanup", post(submit_cleanup))
        .with_state(state)
}

/// GET /v1/system/pools - Merged counters for both pools
#[utoipa::path(
    get,
    path = "/v1/system/pools",
    responses((status = 200, description = "Aggregate pool status", body = AggregateSnapshot)),
    tag = "system"
)]
pub async fn pool_status(State(state): State<AppState>) -> Json<AggregateSnapshot> {
    Json(state.orchestrator.aggregate_status())
}

/// Query parameters for the cleanup job
#[derive(Debug, Deserialize, IntoParams)]
pub struct CleanupQuery {
    /// Terminal records older than this many seconds are dropped.
    /// Defaults to one hour.
    #[param(example = 3600)]
    pub max_age_secs: Option<u64>,
}

/// Receipt for a submitted housekeeping job
#[derive(Debug, Serialize, ToSchema)]
pub struct CleanupSubmitted {
    pub task_id: Uuid,
}

/// POST /v1/system/cleanup - Queue a record-cleanup job on the system pool
///
/// The job itself runs inside a system-pool worker, so housekeeping never
/// competes with generation work for agent workers.
#[utoipa::path(
    post,
    path = "/v1/system/cleanup",
    params(CleanupQuery),
    responses(
        (status = 202, description = "Cleanup job queued", body = CleanupSubmitted),
        (status = 429, description = "System pool queue is full")
    ),
    tag = "system"
)]
pub async fn submit_cleanup(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
) -> Result<(StatusCode, Json<CleanupSubmitted>), StatusCode> {
    let max_age = Duration::from_secs(query.max_age_secs.unwrap_or(3600));
    let orchestrator = Arc::clone(&state.orchestrator);
    let queue_timeout = Duration::from_secs(30);

    let item = TaskItem::new("system", "cleanup", 1, queue_timeout, move |_| {
        Box::pin(async move {
            let removed = orchestrator.cleanup(max_age);
            tracing::info!(removed, "Task record cleanup finished");
            Ok(json!({"removed": removed}))
        })
    });

    let task_id = state
        .orchestrator
        .submit_system(item)
        .map_err(|e| pool_error_status(&e))?;

    Ok((StatusCode::ACCEPTED, Json(CleanupSubmitted { task_id })))
}
