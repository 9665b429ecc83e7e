use std::path::Path;

use async_trait::async_trait;

use crate::error::AnalysisError;
use crate::types::{find_model, ModelEntry, ServiceHealth};

/// A vision-capable inference backend.
///
/// Probes (`check_*`) never fail: an unreachable backend simply reports `false`.
/// Only `infer` and the listing calls surface [`AnalysisError`]s.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Backend name used in logs (e.g., "ollama").
    fn name(&self) -> &str;

    /// Short-timeout reachability probe.
    async fn check_liveness(&self) -> bool;

    /// Whether the backend lists a model matching `model`'s base name.
    async fn check_model_availability(&self, model: &str) -> bool {
        match self.list_models().await {
            Ok(models) => find_model(&models, model).is_some(),
            Err(_) => false,
        }
    }

    /// Parsed model listing.
    async fn list_models(&self) -> Result<Vec<ModelEntry>, AnalysisError>;

    /// Model listing exactly as the backend returned it.
    async fn list_models_raw(&self) -> Result<serde_json::Value, AnalysisError>;

    /// Describe the image at `image_path`. Callers confirm readiness first.
    async fn infer(&self, image_path: &Path, prompt: &str) -> Result<String, AnalysisError>;

    /// Live health snapshot from a single listing call.
    async fn service_health(&self, model: &str) -> ServiceHealth {
        match self.list_models().await {
            Ok(models) => ServiceHealth {
                backend_reachable: true,
                model_available: find_model(&models, model).is_some(),
                available_models: models.into_iter().map(|m| m.name).collect(),
            },
            Err(_) => ServiceHealth::default(),
        }
    }
}
