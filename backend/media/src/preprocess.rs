//! Best-effort image downsampling before inference.
//!
//! Smaller payloads mean faster uploads to the backend and faster vision
//! encoding. Any failure falls back to the original file: preprocessing is an
//! optimization, never a reason to fail an analysis.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::ImageReader;
use picscribe_config::PreprocessConfig;
use tracing::{debug, warn};

use crate::staging::{remove_blocking, remove_quietly};

#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    enabled: bool,
    max_dimension: u32,
    jpeg_quality: u8,
}

impl ImagePreprocessor {
    pub fn new(config: &PreprocessConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_dimension: config.max_dimension,
            jpeg_quality: config.jpeg_quality,
        }
    }

    /// Write an inference-ready JPEG of `source` to `target` and return the
    /// path inference should use: `target` on success, `source` otherwise.
    ///
    /// If this future is dropped mid-encode, the blocking task deletes
    /// whatever it wrote once it finishes.
    pub async fn optimize(&self, source: &Path, target: &Path) -> PathBuf {
        if !self.enabled {
            return source.to_path_buf();
        }

        let abandoned = AbandonFlag::new();
        let flag = Arc::clone(&abandoned.flag);
        let (src, dst) = (source.to_path_buf(), target.to_path_buf());
        let (max_dimension, quality) = (self.max_dimension, self.jpeg_quality);
        let result = tokio::task::spawn_blocking(move || {
            downsample_unless_abandoned(&src, &dst, max_dimension, quality, &flag)
        })
        .await;
        abandoned.defuse();

        match result {
            Ok(Ok((width, height))) => {
                debug!(source = %source.display(), width, height, "Preprocessed image");
                target.to_path_buf()
            }
            Ok(Err(e)) => {
                warn!(
                    source = %source.display(),
                    error = %format!("{e:#}"),
                    "Preprocessing failed; using original image"
                );
                remove_quietly(target).await;
                source.to_path_buf()
            }
            Err(e) => {
                warn!(
                    source = %source.display(),
                    error = %e,
                    "Preprocessing task aborted; using original image"
                );
                remove_quietly(target).await;
                source.to_path_buf()
            }
        }
    }
}

/// Raised when `optimize` is dropped before its blocking task completes.
struct AbandonFlag {
    flag: Arc<AtomicBool>,
    armed: bool,
}

impl AbandonFlag {
    fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            armed: true,
        }
    }

    fn defuse(mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonFlag {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(true, Ordering::SeqCst);
        }
    }
}

fn downsample_unless_abandoned(
    source: &Path,
    target: &Path,
    max_dimension: u32,
    quality: u8,
    abandoned: &AtomicBool,
) -> Result<(u32, u32)> {
    let result = downsample(source, target, max_dimension, quality);
    if abandoned.load(Ordering::SeqCst) {
        remove_blocking(target);
    }
    result
}

/// Decode, shrink so the longest side fits `max_dimension` (never enlarging),
/// and re-encode as JPEG. Returns the output dimensions.
fn downsample(source: &Path, target: &Path, max_dimension: u32, quality: u8) -> Result<(u32, u32)> {
    let img = ImageReader::open(source)
        .context("open image")?
        .with_guessed_format()
        .context("sniff image format")?
        .decode()
        .context("decode image")?;

    let img = if img.width().max(img.height()) > max_dimension {
        img.resize(max_dimension, max_dimension, FilterType::Lanczos3)
    } else {
        img
    };

    // JPEG has no alpha channel.
    let rgb = img.to_rgb8();

    let file = std::fs::File::create(target).context("create preprocessed file")?;
    let mut writer = BufWriter::new(file);
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, quality))
        .context("encode jpeg")?;
    writer.flush().context("flush preprocessed file")?;

    Ok(rgb.dimensions())
}
