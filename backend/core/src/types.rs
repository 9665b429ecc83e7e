use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

/// Prompt used when a request carries none, or only whitespace.
pub const DEFAULT_PROMPT: &str = "Describe this image in detail. Summarize the main subjects, \
     the setting, any visible text, and the overall mood in a few clear sentences.";

/// A file received from a client that has not been written to storage yet.
#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub filename: String,
    pub data: Bytes,
}

impl PendingUpload {
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// One image plus the prompt to analyze it with.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub upload: PendingUpload,
    pub prompt: Option<String>,
}

impl AnalysisRequest {
    pub fn new(upload: PendingUpload, prompt: Option<String>) -> Self {
        Self { upload, prompt }
    }

    /// The prompt to send, falling back to [`DEFAULT_PROMPT`] when absent or blank.
    pub fn effective_prompt(&self) -> &str {
        match self.prompt.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => p,
            _ => DEFAULT_PROMPT,
        }
    }
}

/// A temporary file staged for exactly one analysis.
///
/// Deliberately not `Clone`: releasing consumes the artifact, so it can be
/// released at most once and never used afterwards.
#[derive(Debug)]
pub struct UploadedArtifact {
    id: Uuid,
    path: PathBuf,
    original_name: String,
    size: u64,
    extension: String,
    mime_type: String,
    derived_path: Option<PathBuf>,
}

impl UploadedArtifact {
    pub fn new(
        id: Uuid,
        path: PathBuf,
        original_name: impl Into<String>,
        size: u64,
        extension: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            id,
            path,
            original_name: original_name.into(),
            size,
            extension: extension.into(),
            mime_type: mime_type.into(),
            derived_path: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn derived_path(&self) -> Option<&Path> {
        self.derived_path.as_deref()
    }

    /// Record a preprocessed copy so it is deleted together with the staged file.
    /// Passing the staged path itself is a no-op.
    pub fn attach_derived(&mut self, path: PathBuf) {
        if path != self.path {
            self.derived_path = Some(path);
        }
    }

    /// The file inference should read: the preprocessed copy if any, else the original.
    pub fn inference_path(&self) -> &Path {
        self.derived_path.as_deref().unwrap_or(&self.path)
    }

    /// Consume the artifact, yielding every path it owns.
    pub fn into_paths(self) -> Vec<PathBuf> {
        let mut paths = vec![self.path];
        paths.extend(self.derived_path);
        paths
    }
}

/// Successful single-image analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    pub filename: String,
    pub file_size: u64,
    pub summary: String,
    pub processing_time_secs: f64,
    pub model: String,
}

/// Per-item result of an analysis attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Success {
        filename: String,
        summary: String,
        processing_time_secs: f64,
    },
    Failure {
        filename: String,
        error: String,
    },
}

impl AnalysisOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn filename(&self) -> &str {
        match self {
            Self::Success { filename, .. } | Self::Failure { filename, .. } => filename,
        }
    }
}

impl From<AnalysisReport> for AnalysisOutcome {
    fn from(report: AnalysisReport) -> Self {
        Self::Success {
            filename: report.filename,
            summary: report.summary,
            processing_time_secs: report.processing_time_secs,
        }
    }
}

impl Serialize for AnalysisOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Success {
                filename,
                summary,
                processing_time_secs,
            } => {
                let mut s = serializer.serialize_struct("AnalysisOutcome", 4)?;
                s.serialize_field("success", &true)?;
                s.serialize_field("filename", filename)?;
                s.serialize_field("summary", summary)?;
                s.serialize_field("processingTime", processing_time_secs)?;
                s.end()
            }
            Self::Failure { filename, error } => {
                let mut s = serializer.serialize_struct("AnalysisOutcome", 3)?;
                s.serialize_field("success", &false)?;
                s.serialize_field("filename", filename)?;
                s.serialize_field("error", error)?;
                s.end()
            }
        }
    }
}

/// Aggregate counts for a batch. `successful + failed == total` by construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Ordered outcomes of a batch plus their tally.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub results: Vec<AnalysisOutcome>,
    pub summary: BatchSummary,
}

impl BatchOutcome {
    /// Tally outcome tags. Order of `results` is preserved as given.
    pub fn from_outcomes(results: Vec<AnalysisOutcome>) -> Self {
        let successful = results.iter().filter(|o| o.is_success()).count();
        let summary = BatchSummary {
            total: results.len(),
            successful,
            failed: results.len() - successful,
        };
        Self { results, summary }
    }
}

/// One entry of the backend's model listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

/// Live view of the backend. Recomputed on every request, never cached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub backend_reachable: bool,
    pub model_available: bool,
    pub available_models: BTreeSet<String>,
}

/// Base name of a model id: everything before the tag separator.
pub fn model_base_name(model: &str) -> &str {
    model.split(':').next().unwrap_or(model)
}

/// Find the entry serving `requested`.
///
/// An entry matches when its name starts with the requested base name. When
/// several entries match, the first one in listing order wins.
pub fn find_model<'a>(models: &'a [ModelEntry], requested: &str) -> Option<&'a ModelEntry> {
    let base = model_base_name(requested.trim());
    if base.is_empty() {
        return None;
    }
    models.iter().find(|m| m.name.starts_with(base))
}

/// Round wall-clock seconds to two decimals for reporting.
pub fn round_secs(secs: f64) -> f64 {
    (secs * 100.0).round() / 100.0
}
