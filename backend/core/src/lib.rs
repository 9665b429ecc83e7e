//! Core types, error taxonomy, and the inference backend trait shared by every
//! Picscribe crate.

pub mod error;
pub mod traits;
pub mod types;

pub use error::AnalysisError;
pub use traits::VisionBackend;
pub use types::{
    find_model, model_base_name, round_secs, AnalysisOutcome, AnalysisReport, AnalysisRequest,
    BatchOutcome, BatchSummary, ModelEntry, PendingUpload, ServiceHealth, UploadedArtifact,
    DEFAULT_PROMPT,
};
