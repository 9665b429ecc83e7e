//! CLI Analyze Command
//!
//! Runs local files through the coordinator as one batch and prints the
//! outcome as JSON.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use picscribe_core::{AnalysisRequest, PendingUpload};
use picscribe_executor::BatchCoordinator;

pub async fn run(
    coordinator: &BatchCoordinator,
    files: &[PathBuf],
    prompt: Option<String>,
) -> Result<()> {
    let requests = read_requests(files, prompt).await?;
    let outcome = coordinator.run_batch(requests).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if outcome.summary.failed > 0 {
        bail!(
            "{} of {} images failed",
            outcome.summary.failed,
            outcome.summary.total
        );
    }
    Ok(())
}

async fn read_requests(files: &[PathBuf], prompt: Option<String>) -> Result<Vec<AnalysisRequest>> {
    let mut requests = Vec::with_capacity(files.len());
    for path in files {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let upload = PendingUpload::new(display_name(path), data);
        requests.push(AnalysisRequest::new(upload, prompt.clone()));
    }
    Ok(requests)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
