//! Environment variable overrides, applied on top of the file config.
//!
//! Unset or empty variables leave the file value in place. A variable that is
//! set but cannot be parsed is an error rather than a silent fallback.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use crate::schema::{AppConfig, Environment};

/// Error returned for an env var whose value does not parse.
#[derive(Debug, thiserror::Error)]
#[error("Invalid value {value:?} for env var \"{var_name}\": expected {expected}")]
pub struct EnvOverrideError {
    pub var_name: String,
    pub value: String,
    pub expected: &'static str,
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(config: AppConfig) -> Result<AppConfig, EnvOverrideError> {
    apply_env_overrides_with(config, &std::env::vars().collect())
}

/// Apply overrides from a provided map (useful for testing).
pub fn apply_env_overrides_with(
    mut config: AppConfig,
    env: &HashMap<String, String>,
) -> Result<AppConfig, EnvOverrideError> {
    let lookup = |name: &str| env.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());

    if let Some(v) = lookup("PICSCRIBE_ENV") {
        config.environment = match v.to_ascii_lowercase().as_str() {
            "development" | "dev" => Environment::Development,
            "production" | "prod" => Environment::Production,
            _ => return Err(invalid("PICSCRIBE_ENV", v, "development or production")),
        };
    }
    if let Some(v) = lookup("PICSCRIBE_BIND") {
        config.server.bind_address = v.to_string();
    }
    if let Some(v) = lookup("PICSCRIBE_PORT") {
        config.server.port = parse("PICSCRIBE_PORT", v, "a port number")?;
    }
    if let Some(v) = lookup("OLLAMA_URL") {
        config.backend.base_url = v.trim_end_matches('/').to_string();
    }
    if let Some(v) = lookup("OLLAMA_MODEL") {
        config.backend.model = v.to_string();
    }
    if let Some(v) = lookup("PICSCRIBE_REQUEST_TIMEOUT_SECS") {
        config.backend.request_timeout_secs =
            parse("PICSCRIBE_REQUEST_TIMEOUT_SECS", v, "whole seconds")?;
    }
    if let Some(v) = lookup("PICSCRIBE_UPLOAD_DIR") {
        config.uploads.dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("PICSCRIBE_MAX_FILE_SIZE") {
        config.uploads.max_file_size = parse("PICSCRIBE_MAX_FILE_SIZE", v, "a size in bytes")?;
    }
    if let Some(v) = lookup("PICSCRIBE_PREPROCESS") {
        config.preprocessing.enabled = parse_bool("PICSCRIBE_PREPROCESS", v)?;
    }
    if let Some(v) = lookup("PICSCRIBE_BATCH_CONCURRENCY") {
        config.batch.concurrency = parse("PICSCRIBE_BATCH_CONCURRENCY", v, "a positive integer")?;
    }
    if let Some(v) = lookup("PICSCRIBE_LOG_DIR") {
        config.logging.dir = Some(PathBuf::from(v));
    }
    if let Some(v) = lookup("PICSCRIBE_LOG_JSON") {
        config.logging.json = parse_bool("PICSCRIBE_LOG_JSON", v)?;
    }

    Ok(config)
}

fn parse<T: FromStr>(
    name: &str,
    value: &str,
    expected: &'static str,
) -> Result<T, EnvOverrideError> {
    value.parse().map_err(|_| invalid(name, value, expected))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, EnvOverrideError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, value, "a boolean")),
    }
}

fn invalid(name: &str, value: &str, expected: &'static str) -> EnvOverrideError {
    EnvOverrideError {
        var_name: name.to_string(),
        value: value.to_string(),
        expected,
    }
}
