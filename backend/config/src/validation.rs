//! Config validation: checks with user-friendly error messages.

use crate::schema::AppConfig;
use thiserror::Error;

/// A config validation error with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// A collection of validation errors found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate the config and return a report of all errors and warnings.
pub fn validate(config: &AppConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_server(config, &mut report);
    validate_backend(config, &mut report);
    validate_uploads(config, &mut report);
    validate_processing(config, &mut report);
    report
}

fn validate_server(config: &AppConfig, report: &mut ValidationReport) {
    if config.server.port == 0 {
        report.error("server.port", "port must be > 0");
    } else if config.server.port < 1024 {
        report.warn(
            "server.port",
            format!(
                "Port {} requires elevated privileges; consider using a port >= 1024",
                config.server.port
            ),
        );
    }
}

fn validate_backend(config: &AppConfig, report: &mut ValidationReport) {
    let backend = &config.backend;
    if !(backend.base_url.starts_with("http://") || backend.base_url.starts_with("https://")) {
        report.error(
            "backend.baseUrl",
            format!("'{}' must start with http:// or https://", backend.base_url),
        );
    }
    if backend.model.trim().is_empty() {
        report.error("backend.model", "model cannot be empty");
    }
    if backend.request_timeout_secs == 0 {
        report.error("backend.requestTimeoutSecs", "requestTimeoutSecs must be > 0");
    }
    if backend.liveness_timeout_secs == 0 {
        report.error("backend.livenessTimeoutSecs", "livenessTimeoutSecs must be > 0");
    } else if backend.liveness_timeout_secs >= backend.request_timeout_secs {
        report.warn(
            "backend.livenessTimeoutSecs",
            "liveness probe timeout is not shorter than the inference timeout",
        );
    }
    if !(0.0..=2.0).contains(&backend.temperature) {
        report.error("backend.temperature", "temperature must be within 0.0..=2.0");
    }
    if !(0.0..=1.0).contains(&backend.top_p) {
        report.error("backend.topP", "topP must be within 0.0..=1.0");
    }
}

fn validate_uploads(config: &AppConfig, report: &mut ValidationReport) {
    let uploads = &config.uploads;
    if uploads.max_file_size == 0 {
        report.error("uploads.maxFileSize", "maxFileSize must be > 0");
    }
    if uploads.allowed_extensions.is_empty() {
        report.error("uploads.allowedExtensions", "at least one extension is required");
    }
    for ext in &uploads.allowed_extensions {
        if ext.starts_with('.') || ext.chars().any(|c| c.is_ascii_uppercase()) {
            report.warn(
                "uploads.allowedExtensions",
                format!("'{ext}' should be lowercase without a leading dot"),
            );
        }
    }
    if uploads.max_batch_files == 0 {
        report.error("uploads.maxBatchFiles", "maxBatchFiles must be >= 1");
    }
}

fn validate_processing(config: &AppConfig, report: &mut ValidationReport) {
    if config.preprocessing.max_dimension == 0 {
        report.error("preprocessing.maxDimension", "maxDimension must be > 0");
    }
    if !(1..=100).contains(&config.preprocessing.jpeg_quality) {
        report.error("preprocessing.jpegQuality", "jpegQuality must be within 1..=100");
    }
    if config.batch.concurrency == 0 {
        report.error("batch.concurrency", "concurrency must be >= 1");
    }
}
