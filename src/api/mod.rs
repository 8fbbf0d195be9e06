// src/api/mod.rs — Read-only observability API plus feedback ingestion

pub mod auth;
pub mod handlers;
pub mod types;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::core::Engine;
use crate::infra::config::ApiConfig;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Engine>,
    pub token: Option<String>,
}

/// Build the axum router with all API routes.
pub fn build_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/runs", get(handlers::list_runs))
        .route("/api/v1/patterns", get(handlers::list_patterns))
        .route("/api/v1/synergies", get(handlers::list_synergies))
        .route("/api/v1/drift", get(handlers::get_drift))
        .route("/api/v1/calibration", get(handlers::get_calibration))
        .route("/api/v1/feedback", post(handlers::submit_feedback))
        .layer(cors)
        .with_state(state)
}

/// Serve until `shutdown` fires.
pub async fn start_server(
    config: &ApiConfig,
    state: ApiState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = format!("127.0.0.1:{}", config.port);
    let router = build_router(state);

    tracing::info!("API server listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
