//! Main HTTP Gateway Server.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{Method, StatusCode, Uri},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{info, instrument, warn};

use picscribe_core::AnalysisError;
use picscribe_executor::BatchCoordinator;

use crate::analyze_api;
use crate::error::{internal_error_response, ApiError};
use crate::health_api;

/// Room for multipart boundaries, headers, and the prompt field.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Endpoints listed in 404 responses.
pub const AVAILABLE_ENDPOINTS: &[&str] = &[
    "GET /health",
    "GET /status",
    "GET /models",
    "POST /analyze-image",
    "POST /batch-analyze",
];

/// Application state shared across routes.
#[derive(Clone)]
pub struct GatewayState {
    pub coordinator: Arc<BatchCoordinator>,
}

impl GatewayState {
    pub fn new(coordinator: Arc<BatchCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Wrap an error for the response, exposing its kind in development.
    pub fn api_error(&self, err: AnalysisError) -> ApiError {
        let development = self.coordinator.config().environment.is_development();
        ApiError::new(err, development)
    }
}

/// Build the router with every route and layer.
pub fn build_router(state: GatewayState) -> Router {
    let uploads = &state.coordinator.config().uploads;
    let body_limit = (uploads.max_file_size as usize)
        .saturating_mul(uploads.max_batch_files)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/health", get(health_api::get_health))
        .route("/status", get(health_api::get_status))
        .route("/models", get(health_api::get_models))
        .route("/analyze-image", post(analyze_api::analyze_image))
        .route("/batch-analyze", post(analyze_api::batch_analyze))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::custom(|_panic: Box<dyn std::any::Any + Send + 'static>| {
            warn!("Request handler panicked");
            internal_error_response()
        }))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for any unmatched route.
async fn not_found(method: Method, uri: Uri) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Endpoint not found",
            "path": uri.path(),
            "method": method.as_str(),
            "availableEndpoints": AVAILABLE_ENDPOINTS,
        })),
    )
}

/// Serve on an already bound listener until `shutdown` resolves.
#[instrument(skip_all)]
pub async fn serve(
    listener: TcpListener,
    state: GatewayState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr().context("listener has no local address")?;
    info!(%addr, "Gateway HTTP server listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn start_server(addr: &str, state: GatewayState) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    serve(listener, state, shutdown_signal()).await
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
