//! Multipart upload reading.
//!
//! Files are read chunk by chunk so an oversized upload is rejected as soon as
//! it crosses the limit, without buffering the rest of it.

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::Multipart;
use axum::http::StatusCode;
use bytes::BytesMut;
use tracing::debug;

use picscribe_core::{AnalysisError, PendingUpload};
use picscribe_media::format_size;

/// Files and prompt pulled out of a multipart body.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub files: Vec<PendingUpload>,
    pub prompt: Option<String>,
}

/// Limits applied while reading.
#[derive(Debug, Clone, Copy)]
pub struct FormLimits<'a> {
    /// Field name carrying files (`image` or `images`).
    pub file_field: &'a str,
    pub max_files: usize,
    pub max_file_size: u64,
}

/// Read `prompt` and every `limits.file_field` file. Other fields are skipped.
pub async fn read_upload_form(
    mut multipart: Multipart,
    limits: FormLimits<'_>,
) -> Result<UploadForm, AnalysisError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "prompt" {
            form.prompt = Some(field.text().await.map_err(multipart_error)?);
        } else if name == limits.file_field {
            if form.files.len() >= limits.max_files {
                return Err(too_many_files(limits));
            }
            let filename = field.file_name().unwrap_or("upload").to_string();
            let data = read_limited(field, &filename, limits.max_file_size).await?;
            form.files.push(PendingUpload::new(filename, data.freeze()));
        } else {
            debug!(field = %name, "Ignoring unexpected multipart field");
        }
    }

    Ok(form)
}

async fn read_limited(
    mut field: Field<'_>,
    filename: &str,
    max_file_size: u64,
) -> Result<BytesMut, AnalysisError> {
    let mut data = BytesMut::new();
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        if (data.len() + chunk.len()) as u64 > max_file_size {
            return Err(AnalysisError::validation(format!(
                "File too large: '{filename}' exceeds the {} limit",
                format_size(max_file_size)
            )));
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

fn too_many_files(limits: FormLimits<'_>) -> AnalysisError {
    if limits.max_files == 1 {
        AnalysisError::validation(
            "Only one image can be analyzed per request; use /batch-analyze for several",
        )
    } else {
        AnalysisError::validation(format!(
            "Too many files: at most {} per batch",
            limits.max_files
        ))
    }
}

fn multipart_error(err: MultipartError) -> AnalysisError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AnalysisError::validation("File too large: request body exceeds the upload limit")
    } else {
        AnalysisError::validation(format!("Invalid multipart body: {}", err.body_text()))
    }
}
