// Task status and cancellation routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use genrelay_core::{PoolError, TaskRecord};

use crate::common::pool_error_status;
use crate::state::AppState;

/// Create task routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/tasks/:id", get(get_task))
        .route("/v1/tasks/:id/cancel", post(cancel_task))
        .with_state(state)
}

/// GET /v1/tasks/{id} - Look up one task record
#[utoipa::path(
    get,
    path = "/v1/tasks/{id}",
    params(("id" = Uuid, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Task record", body = TaskRecord),
        (status = 404, description = "Unknown task id")
    ),
    tag = "tasks"
)]
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskRecord>, StatusCode> {
    state
        .orchestrator
        .status(id)
        .map(Json)
        .ok_or_else(|| pool_error_status(&PoolError::TaskNotFound(id)))
}

/// Outcome of a cancellation attempt
#[derive(Debug, Serialize, ToSchema)]
pub struct CancelResponse {
    pub id: Uuid,
    /// Whether the task was cancelled. `false` means it was still waiting in
    /// the raw queue, had already started, or had already finished.
    pub cancelled: bool,
}

/// POST /v1/tasks/{id}/cancel - Best-effort cancellation
#[utoipa::path(
    post,
    path = "/v1/tasks/{id}/cancel",
    params(("id" = Uuid, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Cancellation outcome", body = CancelResponse),
        (status = 404, description = "Unknown task id")
    ),
    tag = "tasks"
)]
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelResponse>, StatusCode> {
    if state.orchestrator.status(id).is_none() {
        return Err(pool_error_status(&PoolError::TaskNotFound(id)));
    }
    let cancelled = state.orchestrator.cancel(id);
    Ok(Json(CancelResponse { id, cancelled }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_unknown_task_is_404() {
        let app = routes(AppState::for_tests());

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/tasks/{}", Uuid::now_v7()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_completed_task_record_is_served() {
        let state = AppState::for_tests();
        let item = genrelay_core::TaskItem::new(
            "user-1",
            "generate",
            5,
            std::time::Duration::from_secs(60),
            |_| Box::pin(async { Ok(serde_json::json!({"text": "done"})) }),
        );
        let id = state.orchestrator.submit_agent(item).unwrap();

        // Wait for the worker to finish
        for _ in 0..200 {
            if state
                .orchestrator
                .status(id)
                .is_some_and(|r| r.status.is_terminal())
            {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let app = routes(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/tasks/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let record: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(record["status"], "completed");
        assert_eq!(record["value"]["text"], "done");
    }

    #[tokio::test]
    async fn test_cancel_unknown_task_is_404() {
        let app = routes(AppState::for_tests());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/tasks/{}/cancel", Uuid::now_v7()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
