//! Upload validation.
//!
//! Runs before any storage or network I/O, so a rejected file costs nothing
//! and is never staged.

use picscribe_config::UploadConfig;
use picscribe_core::{AnalysisError, PendingUpload};
use tracing::debug;

use crate::mime_detect::extension_of;

/// Checks a candidate file's extension and size against the upload policy.
#[derive(Debug, Clone)]
pub struct UploadIngest {
    allowed_extensions: Vec<String>,
    max_file_size: u64,
    max_batch_files: usize,
}

impl UploadIngest {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            max_file_size: config.max_file_size,
            max_batch_files: config.max_batch_files,
        }
    }

    /// Accept `filename` of `size` bytes, returning its lowercased extension.
    pub fn validate(&self, filename: &str, size: u64) -> Result<String, AnalysisError> {
        let ext = extension_of(filename).ok_or_else(|| {
            AnalysisError::validation(format!(
                "File '{filename}' has no extension. Allowed types: {}",
                self.allowed_list()
            ))
        })?;

        if !self.allowed_extensions.iter().any(|a| *a == ext) {
            return Err(AnalysisError::validation(format!(
                "Invalid file type '.{ext}'. Allowed types: {}",
                self.allowed_list()
            )));
        }

        if size == 0 {
            return Err(AnalysisError::validation(format!("File '{filename}' is empty")));
        }

        if size > self.max_file_size {
            return Err(AnalysisError::validation(format!(
                "File too large: '{filename}' is {} but the limit is {}",
                format_size(size),
                format_size(self.max_file_size)
            )));
        }

        debug!(filename, size, ext = %ext, "Upload accepted");
        Ok(ext)
    }

    pub fn validate_upload(&self, upload: &PendingUpload) -> Result<String, AnalysisError> {
        self.validate(&upload.filename, upload.size())
    }

    /// Validate every file of a batch plus the file count, before anything is staged.
    pub fn validate_batch(&self, uploads: &[PendingUpload]) -> Result<(), AnalysisError> {
        if uploads.is_empty() {
            return Err(AnalysisError::validation("No image files provided"));
        }
        if uploads.len() > self.max_batch_files {
            return Err(AnalysisError::validation(format!(
                "Too many files: {} submitted, at most {} per batch",
                uploads.len(),
                self.max_batch_files
            )));
        }
        for upload in uploads {
            self.validate_upload(upload)?;
        }
        Ok(())
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn max_batch_files(&self) -> usize {
        self.max_batch_files
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    fn allowed_list(&self) -> String {
        self.allowed_extensions.join(", ")
    }
}

/// Human-readable byte count, e.g. `16.0 MiB`.
pub fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    let b = bytes as f64;
    if b >= MIB {
        format!("{:.1} MiB", b / MIB)
    } else if b >= KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{bytes} bytes")
    }
}
