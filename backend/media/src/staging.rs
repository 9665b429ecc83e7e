//! Temporary artifact lifecycle.
//!
//! Every upload is written under a generated name, never the client's, and
//! deleted by [`FileLifecycleManager::release`]. If the analysis owning it is
//! dropped first, its [`ReleaseGuard`] deletes the files instead. Deletion
//! problems are logged and swallowed so they can never mask a result.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use picscribe_core::{AnalysisError, UploadedArtifact};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::mime_detect::{extension_of, mime_for_extension};

/// Prefix of every file this manager creates. Anything else in the
/// directory is left alone by the sweep.
pub const ARTIFACT_PREFIX: &str = "upload-";

/// Suffix of preprocessed copies.
const DERIVED_SUFFIX: &str = "-optimized.jpg";

#[derive(Debug, Clone)]
pub struct FileLifecycleManager {
    dir: PathBuf,
}

impl FileLifecycleManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the upload directory if needed.
    pub async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create upload directory: {}", self.dir.display()))
    }

    /// Write `data` to a fresh, collision-free path.
    pub async fn stage(
        &self,
        data: &[u8],
        original_name: &str,
    ) -> Result<UploadedArtifact, AnalysisError> {
        let id = Uuid::new_v4();
        let ext = extension_of(original_name).unwrap_or_else(|| "bin".to_string());
        let path = self.dir.join(format!("{ARTIFACT_PREFIX}{id}.{ext}"));

        if let Err(e) = write_new(&path, data).await {
            // Partial writes must not outlive the failed request.
            remove_quietly(&path).await;
            warn!(path = %path.display(), error = %e, "Failed to stage upload");
            return Err(AnalysisError::processing(format!("Failed to store upload: {e}")));
        }

        debug!(%id, path = %path.display(), size = data.len(), "Staged upload");
        Ok(UploadedArtifact::new(
            id,
            path,
            original_name,
            data.len() as u64,
            ext.as_str(),
            mime_for_extension(&ext),
        ))
    }

    /// Where the preprocessed copy of `artifact` goes.
    pub fn derived_path_for(&self, artifact: &UploadedArtifact) -> PathBuf {
        self.dir
            .join(format!("{ARTIFACT_PREFIX}{}{DERIVED_SUFFIX}", artifact.id()))
    }

    /// Arm a guard that deletes `artifact`'s staged file and its derived copy
    /// if it is dropped before [`ReleaseGuard::disarm`].
    pub fn release_guard(&self, artifact: &UploadedArtifact) -> ReleaseGuard {
        ReleaseGuard {
            id: artifact.id(),
            paths: vec![artifact.path().to_path_buf(), self.derived_path_for(artifact)],
            armed: true,
        }
    }

    /// Delete the staged file and any derived copy. Never fails.
    pub async fn release(&self, artifact: UploadedArtifact) {
        let id = artifact.id();
        for path in artifact.into_paths() {
            match fs::remove_file(&path).await {
                Ok(()) => debug!(%id, path = %path.display(), "Released artifact file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(%id, path = %path.display(), "Artifact file already gone")
                }
                Err(e) => {
                    warn!(%id, path = %path.display(), error = %e, "Failed to delete artifact file")
                }
            }
        }
    }

    /// Remove artifacts left behind by an abnormal termination.
    /// Returns how many files were deleted.
    pub async fn sweep_stale(&self) -> usize {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Failed to scan upload directory");
                return 0;
            }
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read upload directory entry");
                    break;
                }
            };
            let is_ours = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(ARTIFACT_PREFIX));
            if !is_ours {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    let path = entry.path();
                    warn!(path = %path.display(), error = %e, "Failed to sweep stale artifact")
                }
            }
        }

        if removed > 0 {
            info!(removed, dir = %self.dir.display(), "Swept stale artifacts");
        }
        removed
    }
}

/// Cleanup for an analysis that never reaches its explicit release, such as a
/// request future dropped on client disconnect.
#[must_use = "dropping the guard immediately deletes the artifact's files"]
#[derive(Debug)]
pub struct ReleaseGuard {
    id: Uuid,
    paths: Vec<PathBuf>,
    armed: bool,
}

impl ReleaseGuard {
    /// Call once the artifact has been released normally.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(id = %self.id, "Analysis dropped before release; removing its files");
        let paths = std::mem::take(&mut self.paths);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for path in &paths {
                        remove_quietly(path).await;
                    }
                });
            }
            Err(_) => {
                for path in &paths {
                    remove_blocking(path);
                }
            }
        }
    }
}

async fn write_new(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(data).await?;
    file.flush().await
}

pub(crate) async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove file");
        }
    }
}

pub(crate) fn remove_blocking(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn stage_uses_generated_name_and_keeps_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileLifecycleManager::new(dir.path());

        let artifact = files.stage(b"png-bytes", "../../etc/Cat.PNG").await.unwrap();
        assert_eq!(artifact.path().parent().unwrap(), dir.path());
        let name = artifact.path().file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(ARTIFACT_PREFIX));
        assert!(name.ends_with(".png"));
        assert_eq!(artifact.original_name(), "../../etc/Cat.PNG");
        assert_eq!(artifact.size(), 9);
        assert_eq!(artifact.mime_type(), "image/png");
        assert_eq!(std::fs::read(artifact.path()).unwrap(), b"png-bytes");
    }

    #[tokio::test]
    async fn same_original_name_never_collides() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileLifecycleManager::new(dir.path());
        let (a, b) = tokio::join!(files.stage(b"a", "x.png"), files.stage(b"b", "x.png"));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.path(), b.path());
        assert_eq!(file_count(dir.path()), 2);
    }

    #[tokio::test]
    async fn release_deletes_staged_and_derived_files() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileLifecycleManager::new(dir.path());
        let mut artifact = files.stage(b"data", "a.jpg").await.unwrap();
        let derived = files.derived_path_for(&artifact);
        std::fs::write(&derived, b"smaller").unwrap();
        artifact.attach_derived(derived);

        files.release(artifact).await;
        assert_eq!(file_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn release_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileLifecycleManager::new(dir.path());
        let artifact = files.stage(b"data", "a.jpg").await.unwrap();
        std::fs::remove_file(artifact.path()).unwrap();
        files.release(artifact).await;
    }

    #[tokio::test]
    async fn stage_into_missing_dir_is_a_processing_error() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileLifecycleManager::new(dir.path().join("nope"));
        let err = files.stage(b"data", "a.png").await.unwrap_err();
        assert!(matches!(err, AnalysisError::Processing(_)));
    }

    #[tokio::test]
    async fn dropped_guard_removes_staged_and_derived_files() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileLifecycleManager::new(dir.path());
        let artifact = files.stage(b"data", "a.png").await.unwrap();
        std::fs::write(files.derived_path_for(&artifact), b"smaller").unwrap();

        drop(files.release_guard(&artifact));
        for _ in 0..50 {
            if file_count(dir.path()) == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(file_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn disarmed_guard_leaves_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileLifecycleManager::new(dir.path());
        let artifact = files.stage(b"data", "a.png").await.unwrap();

        files.release_guard(&artifact).disarm();
        tokio::task::yield_now().await;
        assert_eq!(file_count(dir.path()), 1);

        files.release(artifact).await;
        assert_eq!(file_count(dir.path()), 0);
    }

    #[test]
    fn guard_outside_a_runtime_removes_synchronously() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileLifecycleManager::new(dir.path());
        let staged = dir.path().join("upload-x.png");
        std::fs::write(&staged, b"data").unwrap();
        let artifact = UploadedArtifact::new(
            Uuid::new_v4(),
            staged,
            "x.png",
            4,
            "png",
            "image/png",
        );

        drop(files.release_guard(&artifact));
        assert_eq!(file_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn sweep_only_removes_own_files() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileLifecycleManager::new(dir.path());
        files.ensure_dir().await.unwrap();
        let _leaked = files.stage(b"data", "a.png").await.unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"x").unwrap();

        assert_eq!(files.sweep_stale().await, 1);
        assert_eq!(file_count(dir.path()), 1);
        assert_eq!(FileLifecycleManager::new(dir.path().join("absent")).sweep_stale().await, 0);
    }
}
