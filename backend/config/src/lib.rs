//! `picscribe-config`: Picscribe runtime configuration.
//!
//! Provides:
//! - Typed config schema with per-field defaults
//! - YAML loading from the config directory
//! - Environment variable overrides
//! - Validation with errors and warnings

pub mod defaults;
pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use env::{apply_env_overrides, apply_env_overrides_with, EnvOverrideError};
pub use io::{config_dir, config_file_path, load_config};
pub use schema::{
    AppConfig, BackendConfig, BatchConfig, Environment, LoggingConfig, PreprocessConfig,
    ServerConfig, UploadConfig,
};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{bail, Context, Result};
use std::path::Path;

/// A config that passed validation, with the warnings it produced.
///
/// Warnings are returned rather than logged because the logger is configured
/// from this very config and is not installed yet.
#[derive(Debug)]
pub struct PreparedConfig {
    pub config: AppConfig,
    pub warnings: Vec<ConfigValidationError>,
}

/// Load the file (if any), apply env overrides, and validate.
///
/// This is the main entry point for loading a config at runtime. `path`
/// defaults to `picscribe.yaml` in [`config_dir`].
pub async fn load_and_prepare(path: Option<&Path>) -> Result<PreparedConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path(&config_dir()),
    };

    let config = load_config(&path).await?;
    let config = apply_env_overrides(config).context("Failed to apply env overrides")?;

    let report = validate(&config);
    if !report.is_valid() {
        let details: Vec<String> = report.errors.iter().map(ToString::to_string).collect();
        bail!("Invalid configuration:\n  {}", details.join("\n  "));
    }

    Ok(PreparedConfig {
        config,
        warnings: report.warnings,
    })
}
