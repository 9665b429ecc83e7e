//! Default values for every configurable setting.

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 3001;

/// Default inference backend address (a local Ollama server).
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:11434";

/// Default vision model.
pub const DEFAULT_MODEL: &str = "llava:7b";

/// Hard wall-clock bound on one inference call.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Bound on liveness and listing probes.
pub const DEFAULT_LIVENESS_TIMEOUT_SECS: u64 = 5;

pub const DEFAULT_TEMPERATURE: f32 = 0.1;
pub const DEFAULT_TOP_P: f32 = 0.9;
pub const DEFAULT_MAX_TOKENS: u32 = 500;

/// Directory uploads are staged in.
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";

/// 16 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Accepted image extensions, lowercase.
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

/// Max files in one batch request.
pub const DEFAULT_MAX_BATCH_FILES: usize = 10;

/// Longest side of a preprocessed image, in pixels.
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;

/// JPEG quality for preprocessed copies.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Inference calls in flight per batch. 1 means strictly sequential.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 1;

pub const DEFAULT_LOG_LEVEL: &str = "info";

pub fn default_allowed_extensions() -> Vec<String> {
    DEFAULT_ALLOWED_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use crate::schema::AppConfig;

    use super::*;

    #[test]
    fn default_config_uses_constants() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.port, DEFAULT_PORT);
        assert_eq!(cfg.backend.model, DEFAULT_MODEL);
        assert_eq!(cfg.uploads.max_file_size, 16_777_216);
        assert_eq!(cfg.uploads.allowed_extensions.len(), 5);
        assert_eq!(cfg.preprocessing.max_dimension, 1024);
        assert_eq!(cfg.batch.concurrency, 1);
    }
}
