//! Ollama vision client.
//!
//! Speaks the two endpoints Picscribe depends on: `GET /api/tags` for liveness
//! and model listing, and `POST /api/generate` for image description.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use picscribe_config::BackendConfig;
use picscribe_core::{AnalysisError, ModelEntry, VisionBackend};

/// Client for a local Ollama server.
pub struct OllamaClient {
    client: Client,
    config: BackendConfig,
}

impl OllamaClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("picscribe/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Map a transport failure onto the analysis error taxonomy.
    fn transport_error(&self, err: reqwest::Error, timeout: Duration, what: &str) -> AnalysisError {
        if err.is_connect() {
            AnalysisError::ServiceUnavailable(format!(
                "Inference backend not reachable at {}. Make sure Ollama is running.",
                self.config.base_url
            ))
        } else if err.is_timeout() {
            AnalysisError::Timeout(format!("{what} timed out after {} seconds", timeout.as_secs()))
        } else if err.is_decode() {
            invalid_response()
        } else {
            AnalysisError::processing(format!("{what} failed: {err}"))
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct BackendErrorBody {
    error: String,
}

fn invalid_response() -> AnalysisError {
    AnalysisError::processing("Invalid response from inference backend")
}

#[async_trait]
impl VisionBackend for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn check_liveness(&self) -> bool {
        let result = self
            .client
            .get(self.config.endpoint("/api/tags"))
            .timeout(self.config.liveness_timeout())
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                debug!(status = %resp.status(), "Liveness probe got non-success status");
                false
            }
            Err(e) => {
                debug!(error = %e, "Liveness probe failed");
                false
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelEntry>, AnalysisError> {
        let raw = self.list_models_raw().await?;
        let tags: TagsResponse = serde_json::from_value(raw).map_err(|_| invalid_response())?;
        Ok(tags.models)
    }

    async fn list_models_raw(&self) -> Result<serde_json::Value, AnalysisError> {
        let timeout = self.config.liveness_timeout();
        let resp = self
            .client
            .get(self.config.endpoint("/api/tags"))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e, timeout, "Model listing"))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AnalysisError::processing(format!(
                "Model listing returned {status}"
            )));
        }

        resp.json()
            .await
            .map_err(|e| self.transport_error(e, timeout, "Model listing"))
    }

    async fn infer(&self, image_path: &Path, prompt: &str) -> Result<String, AnalysisError> {
        let bytes = tokio::fs::read(image_path).await.map_err(|e| {
            AnalysisError::processing(format!("Failed to read image for analysis: {e}"))
        })?;

        let body = GenerateRequest {
            model: &self.config.model,
            prompt,
            images: vec![STANDARD.encode(&bytes)],
            stream: false,
            options: GenerateOptions {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                max_tokens: self.config.max_tokens,
            },
        };

        info!(model = %self.config.model, payload_bytes = bytes.len(), "Sending image to Ollama");

        let timeout = self.config.request_timeout();
        let resp = self
            .client
            .post(self.config.endpoint("/api/generate"))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e, timeout, "Analysis"))?;

        let status = resp.status();
        // The body may still be streaming in, so the timeout applies here too.
        let text = resp
            .text()
            .await
            .map_err(|e| self.transport_error(e, timeout, "Analysis"))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<BackendErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or(text);
            warn!(%status, detail = %detail, "Ollama rejected the analysis request");
            if status == StatusCode::NOT_FOUND {
                return Err(AnalysisError::ModelNotFound(format!(
                    "Model '{}' is not available on the inference backend: {detail}",
                    self.config.model
                )));
            }
            return Err(AnalysisError::processing(format!(
                "Inference backend returned {status}: {detail}"
            )));
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&text).map_err(|_| invalid_response())?;

        match parsed.response.map(|r| r.trim().to_string()) {
            Some(summary) if !summary.is_empty() => Ok(summary),
            _ => Err(invalid_response()),
        }
    }
}
