//! HTTP mapping of analysis errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;

use picscribe_core::AnalysisError;

/// An [`AnalysisError`] on its way out as a JSON response.
///
/// Validation failures become 400 `{error}`; everything else becomes 500
/// `{error, timestamp}`. `kind` is only added in development.
#[derive(Debug)]
pub struct ApiError {
    inner: AnalysisError,
    expose_kind: bool,
}

impl ApiError {
    pub fn new(inner: AnalysisError, expose_kind: bool) -> Self {
        Self { inner, expose_kind }
    }

    pub fn status(&self) -> StatusCode {
        if self.inner.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<AnalysisError> for ApiError {
    fn from(inner: AnalysisError) -> Self {
        Self::new(inner, false)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = if status == StatusCode::BAD_REQUEST {
            json!({ "error": self.inner.to_string() })
        } else {
            json!({ "error": self.inner.to_string(), "timestamp": Utc::now().to_rfc3339() })
        };
        if self.expose_kind {
            body["kind"] = json!(self.inner.kind());
        }
        (status, Json(body)).into_response()
    }
}

/// Body of the generic 500 returned when a handler panics.
pub fn internal_error_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal server error", "timestamp": Utc::now().to_rfc3339() })),
    )
        .into_response()
}
