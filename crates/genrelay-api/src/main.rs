// Genrelay API server
// Decision: generation and housekeeping run on separate bounded pools
// Decision: one SSE wire format for both direct and queued streaming

mod common;
mod config;
mod connections;
mod generator;
mod state;
mod streams;
mod system;
mod tasks;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::{routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use genrelay_core::start_sweeper;

use crate::config::ApiConfig;
use crate::state::{build_state, AppState};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    agent_pool_idle: bool,
}

async fn health(axum::extract::State(state): axum::extract::State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        agent_pool_idle: state.orchestrator.is_agent_pool_idle(),
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        streams::generate_stream,
        tasks::get_task,
        tasks::cancel_task,
        system::pool_status,
        system::submit_cleanup,
        connections::connect,
        connections::global_stats,
        connections::list_by_owner,
    ),
    components(
        schemas(
            genrelay_core::TaskRecord,
            genrelay_core::TaskStatus,
            genrelay_core::PoolSnapshot,
            genrelay_core::AggregateSnapshot,
            genrelay_core::ConnectionInfo,
            genrelay_core::RegistryStats,
            tasks::CancelResponse,
            system::CleanupSubmitted,
            streams::GenerateStreamRequest,
            connections::ConnectRequest,
        )
    ),
    tags(
        (name = "streams", description = "SSE generation streaming"),
        (name = "tasks", description = "Task status and cancellation"),
        (name = "system", description = "Pool observability and housekeeping"),
        (name = "connections", description = "Streaming connection statistics")
    ),
    info(
        title = "Genrelay API",
        version = "0.2.0",
        description = "Bounded-pool generation offloading with uniform SSE streaming",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

/// Assemble the full application router (extracted for testing)
fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health).with_state(state.clone()))
        .merge(streams::routes(state.clone()))
        .merge(tasks::routes(state.clone()))
        .merge(system::routes(state.clone()))
        .merge(connections::routes(state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "genrelay_api=debug,genrelay_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("genrelay-api starting...");

    let config = ApiConfig::from_env();
    tracing::info!(
        agent_workers = config.orchestrator.agent.max_workers,
        system_workers = config.orchestrator.system.max_workers,
        "Pool tuning configured"
    );

    let state = build_state(&config);

    // Background eviction of stale streaming connections
    let sweeper = start_sweeper(
        state.registry.clone(),
        config.sweep_interval,
        config.connection_timeout,
    );
    tracing::info!(
        interval_secs = config.sweep_interval.as_secs(),
        timeout_secs = config.connection_timeout.as_secs(),
        "Connection sweeper started"
    );

    // CORS only when origins are configured (same-origin otherwise)
    let cors_origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    if cors_origins.is_empty() {
        tracing::info!("CORS not configured (same-origin requests only)");
    } else {
        tracing::info!(origins = ?cors_origins, "CORS origins configured");
    }

    let mut app = build_app(state.clone());
    if !cors_origins.is_empty() {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(cors_origins))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::CACHE_CONTROL]),
        );
    }
    let app = app.layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    tracing::info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Drain in-flight work before exiting
    tracing::info!("Shutting down pools...");
    sweeper.stop().await;
    if let Err(e) = state.orchestrator.shutdown().await {
        tracing::warn!("Pool shutdown incomplete: {e}");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
}
