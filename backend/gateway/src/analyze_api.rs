//! Image analysis endpoints.

use axum::{extract::{Multipart, State}, Json};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use picscribe_core::{AnalysisError, AnalysisRequest};

use crate::attachments::{read_upload_form, FormLimits, UploadForm};
use crate::error::ApiError;
use crate::server::GatewayState;

/// Handler for `POST /analyze-image` (multipart `image`, optional `prompt`).
pub async fn analyze_image(
    State(state): State<GatewayState>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let ingest = state.coordinator.ingest();
    let limits = FormLimits {
        file_field: "image",
        max_files: 1,
        max_file_size: ingest.max_file_size(),
    };
    let UploadForm { files, prompt } = read_upload_form(multipart, limits)
        .await
        .map_err(|e| state.api_error(e))?;

    let upload = files
        .into_iter()
        .next()
        .ok_or_else(|| state.api_error(AnalysisError::validation("No image file provided")))?;

    info!(filename = %upload.filename, size = upload.size(), "Analyze request");
    let report = state
        .coordinator
        .analyze(AnalysisRequest::new(upload, prompt))
        .await
        .map_err(|e| state.api_error(e))?;

    Ok(Json(json!({
        "success": true,
        "summary": report.summary,
        "filename": report.filename,
        "fileSize": report.file_size,
        "processingTime": report.processing_time_secs,
        "model": report.model,
    })))
}

/// Handler for `POST /batch-analyze` (multipart `images`, optional `prompt`).
///
/// Every file is validated up front; one bad file rejects the whole request
/// before anything is staged.
pub async fn batch_analyze(
    State(state): State<GatewayState>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let ingest = state.coordinator.ingest();
    let limits = FormLimits {
        file_field: "images",
        max_files: ingest.max_batch_files(),
        max_file_size: ingest.max_file_size(),
    };
    let UploadForm { files, prompt } = read_upload_form(multipart, limits)
        .await
        .map_err(|e| state.api_error(e))?;
    ingest.validate_batch(&files).map_err(|e| state.api_error(e))?;

    info!(files = files.len(), "Batch analyze request");
    let requests = files
        .into_iter()
        .map(|upload| AnalysisRequest::new(upload, prompt.clone()))
        .collect();
    let outcome = state.coordinator.run_batch(requests).await;

    Ok(Json(json!({
        "success": true,
        "results": outcome.results,
        "summary": outcome.summary,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}
