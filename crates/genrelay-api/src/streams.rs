// SSE generation streaming route

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::Response,
    routing::post,
    Json, Router,
};
use futures::{stream, FutureExt, StreamExt};
use serde::Deserialize;
use utoipa::ToSchema;

use genrelay_core::{FragmentStream, StreamFactory};

use crate::state::AppState;

/// Create streaming routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/generate/stream", post(generate_stream))
        .with_state(state)
}

/// Request body for streamed generation
#[derive(Debug, Deserialize, ToSchema)]
pub struct GenerateStreamRequest {
    /// Caller identity used for connection tracking and task ownership
    pub owner: String,
    /// Prompt handed to the generation backend
    pub prompt: String,
}

/// POST /v1/generate/stream - Stream generated text as SSE
///
/// With an idle agent pool the response streams fragments as the backend
/// produces them; under load the work is queued and the buffered output is
/// replayed once it completes. Either way the wire format is the same.
#[utoipa::path(
    post,
    path = "/v1/generate/stream",
    request_body = GenerateStreamRequest,
    responses(
        (status = 200, description = "SSE event stream", content_type = "text/event-stream")
    ),
    tag = "streams"
)]
pub async fn generate_stream(
    State(state): State<AppState>,
    Json(request): Json<GenerateStreamRequest>,
) -> Result<Response, StatusCode> {
    let generator = Arc::clone(&state.generator);
    let prompt = request.prompt;

    // The factory is deferred: on the queued path it runs inside a pool
    // worker, so the backend must not be opened before then.
    let factory: StreamFactory = Box::new(move || {
        let opened = async move {
            match generator.open_stream(&prompt).await {
                Ok(fragments) => fragments,
                Err(error) => {
                    Box::pin(stream::once(async move { Err(error) })) as FragmentStream
                }
            }
        };
        Box::pin(opened.flatten_stream())
    });

    let frames = state.router.stream(request.owner, "generate", factory);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(frames.map(Ok::<_, Infallible>)))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
