// Connection routes: monitor streams and observability

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use futures::{stream, StreamExt};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use genrelay_core::{sse, ConnectionInfo, ConnectionRegistry, RegistryStats};

use crate::state::AppState;

/// Create connection routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/sse/connect", post(connect))
        .route("/v1/connections", get(global_stats))
        .route("/v1/connections/:owner", get(list_by_owner))
        .with_state(state)
}

/// Request body for a monitor connection
#[derive(Debug, Deserialize, ToSchema)]
pub struct ConnectRequest {
    /// Caller identity the connection is tracked under
    pub owner: String,
}

/// Unregisters the connection when the client goes away
struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    id: String,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.id);
    }
}

/// POST /v1/sse/connect - Long-lived monitor stream
///
/// Confirms the connection, then emits a `heartbeat` event on a fixed
/// cadence until the client disconnects. Every heartbeat refreshes the
/// registry entry, so an abandoned connection goes stale and is swept.
#[utoipa::path(
    post,
    path = "/v1/sse/connect",
    request_body = ConnectRequest,
    responses(
        (status = 200, description = "SSE heartbeat stream", content_type = "text/event-stream")
    ),
    tag = "connections"
)]
pub async fn connect(
    State(state): State<AppState>,
    Json(request): Json<ConnectRequest>,
) -> Result<Response, StatusCode> {
    let connection_id = format!("{}-{}", request.owner, Uuid::now_v7());
    state
        .registry
        .register(&connection_id, &request.owner, "monitor");
    state.registry.touch(&connection_id);

    let guard = ConnectionGuard {
        registry: Arc::clone(&state.registry),
        id: connection_id.clone(),
    };

    let opening = sse::status(
        "connected",
        Some(&format!("connection {connection_id} established")),
        None,
    );
    let interval = state.heartbeat_interval;

    let heartbeats = stream::unfold(guard, move |guard| async move {
        tokio::time::sleep(interval).await;
        guard.registry.touch(&guard.id);
        Some((sse::heartbeat(), guard))
    });
    let frames = stream::once(async move { opening })
        .chain(heartbeats)
        .map(Ok::<_, Infallible>);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(frames))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// GET /v1/connections - Registry-wide counters
#[utoipa::path(
    get,
    path = "/v1/connections",
    responses((status = 200, description = "Connection statistics", body = RegistryStats)),
    tag = "connections"
)]
pub async fn global_stats(State(state): State<AppState>) -> Json<RegistryStats> {
    Json(state.registry.global_stats())
}

/// GET /v1/connections/{owner} - Active connections for one owner
#[utoipa::path(
    get,
    path = "/v1/connections/{owner}",
    params(("owner" = String, Path, description = "Owner identity")),
    responses((status = 200, description = "Connections for the owner", body = Vec<ConnectionInfo>)),
    tag = "connections"
)]
pub async fn list_by_owner(
    State(state): State<AppState>,
    Path(owner): Path<String>,
) -> Json<Vec<ConnectionInfo>> {
    Json(state.registry.list_by_owner(&owner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_stats_reflect_registered_connections() {
        let state = AppState::for_tests();
        state.registry.register("c1", "user-1", "stream");
        state.registry.register("c2", "user-2", "stream");

        let app = routes(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/connections")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let stats: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(stats["total_connections"], 2);
        assert_eq!(stats["unique_owners"], 2);
    }

    #[tokio::test]
    async fn test_owner_listing() {
        let state = AppState::for_tests();
        state.registry.register("c1", "user-1", "stream");

        let app = routes(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/connections/user-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let connections: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(connections.as_array().unwrap().len(), 1);
        assert_eq!(connections[0]["id"], "c1");
    }

    #[tokio::test]
    async fn test_monitor_connection_heartbeats_then_unregisters() {
        let state = AppState::for_tests();
        let app = routes(state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/sse/connect")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"owner": "user-1"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let mut body = response.into_body().into_data_stream();

        let first = body.next().await.unwrap().unwrap();
        let first = String::from_utf8(first.to_vec()).unwrap();
        assert!(first.contains("event: status"));
        assert!(first.contains("\"status\":\"connected\""));
        assert_eq!(state.registry.list_by_owner("user-1").len(), 1);

        let second = body.next().await.unwrap().unwrap();
        let second = String::from_utf8(second.to_vec()).unwrap();
        assert!(second.contains("event: heartbeat"));

        // Dropping the stream tears the connection down
        drop(body);
        for _ in 0..100 {
            if state.registry.list_by_owner("user-1").is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(state.registry.list_by_owner("user-1").is_empty());
    }
}
