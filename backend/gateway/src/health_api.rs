//! Health, status, and model listing endpoints.
//!
//! Every call probes the backend live; nothing here is cached.

use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::server::GatewayState;

/// Handler for `GET /health`
pub async fn get_health(State(state): State<GatewayState>) -> Json<Value> {
    let config = state.coordinator.config();
    let model = config.backend.model.as_str();
    let health = state.coordinator.backend().service_health(model).await;

    let status = if health.backend_reachable && health.model_available {
        "ok"
    } else {
        "degraded"
    };

    Json(json!({
        "status": status,
        "timestamp": Utc::now().to_rfc3339(),
        "services": {
            "api": "running",
            "backendReachable": health.backend_reachable,
            "model": if health.model_available { model } else { "not_available" },
        },
        "config": {
            "maxFileSize": config.uploads.max_file_size,
            "allowedExtensions": state.coordinator.ingest().allowed_extensions(),
            "model": model,
        },
    }))
}

/// Handler for `GET /status`
pub async fn get_status(State(state): State<GatewayState>) -> Json<Value> {
    let model = state.coordinator.config().backend.model.as_str();
    let health = state.coordinator.backend().service_health(model).await;

    Json(json!({
        "backend": {
            "running": health.backend_reachable,
            "availableModels": health.available_models,
        },
        "currentModel": model,
        "modelAvailable": health.model_available,
    }))
}

/// Handler for `GET /models`: the backend's listing, untouched.
pub async fn get_models(State(state): State<GatewayState>) -> Result<Json<Value>, ApiError> {
    state
        .coordinator
        .backend()
        .list_models_raw()
        .await
        .map(Json)
        .map_err(|e| state.api_error(e))
}
