//! Upload handling for Picscribe: validation, temporary staging, and
//! best-effort preprocessing of images before inference.

pub mod ingest;
pub mod mime_detect;
pub mod preprocess;
pub mod staging;

pub use ingest::{format_size, UploadIngest};
pub use mime_detect::{extension_of, mime_for_extension};
pub use preprocess::ImagePreprocessor;
pub use staging::{FileLifecycleManager, ReleaseGuard, ARTIFACT_PREFIX};
