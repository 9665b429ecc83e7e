use thiserror::Error;

/// Failure taxonomy for a single image analysis.
///
/// Every variant carries a human-readable message that is safe to hand back
/// to a client; none of them embed backtraces or internal paths.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    /// Bad extension, oversized or missing file. A defect in the caller's input.
    #[error("{0}")]
    Validation(String),

    /// The inference backend could not be reached.
    #[error("{0}")]
    ServiceUnavailable(String),

    /// The backend is up but does not serve the requested model.
    #[error("{0}")]
    ModelNotFound(String),

    /// Inference exceeded the configured wall-clock bound.
    #[error("{0}")]
    Timeout(String),

    /// Malformed backend response or an unexpected internal fault.
    #[error("{0}")]
    Processing(String),
}

impl AnalysisError {
    /// Stable snake_case label for logs and development error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::ModelNotFound(_) => "model_not_found",
            Self::Timeout(_) => "timeout",
            Self::Processing(_) => "processing_error",
        }
    }

    /// Whether the failure was caused by the client's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_the_bare_message() {
        let err = AnalysisError::Timeout("analysis timed out after 120 seconds".into());
        assert_eq!(err.to_string(), "analysis timed out after 120 seconds");
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn only_validation_is_a_client_error() {
        assert!(AnalysisError::validation("bad").is_client_error());
        assert!(!AnalysisError::processing("bad").is_client_error());
        assert!(!AnalysisError::ModelNotFound("m".into()).is_client_error());
    }
}
