use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::{stream, FutureExt, StreamExt};
use tracing::{info, info_span, instrument, warn, Instrument};

use picscribe_config::AppConfig;
use picscribe_core::{
    round_secs, AnalysisError, AnalysisOutcome, AnalysisReport, AnalysisRequest, BatchOutcome,
    UploadedArtifact, VisionBackend,
};
use picscribe_media::{FileLifecycleManager, ImagePreprocessor, UploadIngest};

/// Drives uploads through validation, staging, preprocessing, and inference,
/// one item or a whole batch at a time.
///
/// Every artifact staged here is released before the call that staged it
/// returns, or by its guard if that call is dropped mid-flight.
pub struct BatchCoordinator {
    config: Arc<AppConfig>,
    backend: Arc<dyn VisionBackend>,
    ingest: UploadIngest,
    files: FileLifecycleManager,
    preprocessor: ImagePreprocessor,
}

impl BatchCoordinator {
    pub fn new(config: Arc<AppConfig>, backend: Arc<dyn VisionBackend>) -> Self {
        Self {
            ingest: UploadIngest::new(&config.uploads),
            files: FileLifecycleManager::new(config.uploads.dir.clone()),
            preprocessor: ImagePreprocessor::new(&config.preprocessing),
            config,
            backend,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn VisionBackend> {
        &self.backend
    }

    pub fn ingest(&self) -> &UploadIngest {
        &self.ingest
    }

    pub fn files(&self) -> &FileLifecycleManager {
        &self.files
    }

    /// Live liveness + model check. Never cached: the backend may restart or
    /// unload the model between requests.
    pub async fn ensure_ready(&self) -> Result<(), AnalysisError> {
        let model = &self.config.backend.model;
        if !self.backend.check_liveness().await {
            return Err(AnalysisError::ServiceUnavailable(format!(
                "Inference backend not reachable at {}. Make sure Ollama is running.",
                self.config.backend.base_url
            )));
        }
        if !self.backend.check_model_availability(model).await {
            return Err(AnalysisError::ModelNotFound(format!(
                "Model '{model}' is not available. \
                 Pull it on the backend first (ollama pull {model})."
            )));
        }
        Ok(())
    }

    /// Analyze one image. Validation and readiness failures return before
    /// anything touches the disk.
    #[instrument(skip_all, fields(filename = %request.upload.filename))]
    pub async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisReport, AnalysisError> {
        let started = Instant::now();
        self.ingest.validate_upload(&request.upload)?;
        self.ensure_ready().await?;

        let mut artifact = self
            .files
            .stage(&request.upload.data, &request.upload.filename)
            .await?;
        let guard = self.files.release_guard(&artifact);

        let result = AssertUnwindSafe(self.describe(&mut artifact, request.effective_prompt()))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(AnalysisError::processing("Unexpected internal error during analysis"))
            });

        let file_size = artifact.size();
        self.files.release(artifact).await;
        guard.disarm();

        let summary = result?;
        let processing_time_secs = round_secs(started.elapsed().as_secs_f64());
        info!(processing_time_secs, backend = self.backend.name(), "Analysis complete");

        Ok(AnalysisReport {
            filename: request.upload.filename,
            file_size,
            summary,
            processing_time_secs,
            model: self.config.backend.model.clone(),
        })
    }

    async fn describe(
        &self,
        artifact: &mut UploadedArtifact,
        prompt: &str,
    ) -> Result<String, AnalysisError> {
        let target = self.files.derived_path_for(artifact);
        let used = self.preprocessor.optimize(artifact.path(), &target).await;
        artifact.attach_derived(used);
        self.backend.infer(artifact.inference_path(), prompt).await
    }

    /// Analyze one image, converting any failure into a `Failure` outcome.
    pub async fn run_single(&self, request: AnalysisRequest) -> AnalysisOutcome {
        let filename = request.upload.filename.clone();
        match self.analyze(request).await {
            Ok(report) => report.into(),
            Err(e) => {
                warn!(filename = %filename, kind = e.kind(), error = %e, "Analysis failed");
                AnalysisOutcome::Failure {
                    filename,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Analyze a batch with per-item failure isolation.
    ///
    /// At most `batch.concurrency` items are in flight; outcomes come back in
    /// submission order regardless.
    pub async fn run_batch(&self, requests: Vec<AnalysisRequest>) -> BatchOutcome {
        let limit = self.config.batch.concurrency.max(1);
        let total = requests.len();
        info!(total, limit, "Starting batch");

        let results: Vec<AnalysisOutcome> = stream::iter(requests.into_iter().enumerate())
            .map(|(index, request)| {
                self.run_single(request)
                    .instrument(info_span!("batch_item", index))
            })
            .buffered(limit)
            .collect()
            .await;

        let outcome = BatchOutcome::from_outcomes(results);
        info!(
            total = outcome.summary.total,
            successful = outcome.summary.successful,
            failed = outcome.summary.failed,
            "Batch complete"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use picscribe_core::{ModelEntry, PendingUpload, DEFAULT_PROMPT};

    #[derive(Clone, Copy)]
    enum Behavior {
        TimeOut,
        Panic,
    }

    /// Scriptable backend; call `n` of `infer` follows `plan[n]`, else succeeds.
    struct FakeBackend {
        live: bool,
        models: Vec<ModelEntry>,
        plan: HashMap<usize, Behavior>,
        delay: Duration,
        liveness_calls: AtomicUsize,
        infer_calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        seen: Mutex<Vec<(PathBuf, Vec<u8>, String)>>,
        /// When set, `infer` records how many files this directory holds.
        watch_dir: Option<PathBuf>,
        dir_counts: Mutex<Vec<usize>>,
    }

    impl FakeBackend {
        fn healthy() -> Self {
            Self {
                live: true,
                models: vec![ModelEntry {
                    name: "llava:7b".into(),
                    size: None,
                    modified_at: None,
                }],
                plan: HashMap::new(),
                delay: Duration::ZERO,
                liveness_calls: AtomicUsize::new(0),
                infer_calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                watch_dir: None,
                dir_counts: Mutex::new(Vec::new()),
            }
        }

        fn down() -> Self {
            Self {
                live: false,
                ..Self::healthy()
            }
        }

        fn infer_calls(&self) -> usize {
            self.infer_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VisionBackend for FakeBackend {
        fn name(&self) -> &str {
            "fake"
        }

        async fn check_liveness(&self) -> bool {
            self.liveness_calls.fetch_add(1, Ordering::SeqCst);
            self.live
        }

        async fn list_models(&self) -> Result<Vec<ModelEntry>, AnalysisError> {
            if self.live {
                Ok(self.models.clone())
            } else {
                Err(AnalysisError::ServiceUnavailable("down".into()))
            }
        }

        async fn list_models_raw(&self) -> Result<serde_json::Value, AnalysisError> {
            Ok(serde_json::json!({ "models": self.list_models().await? }))
        }

        async fn infer(&self, image_path: &Path, prompt: &str) -> Result<String, AnalysisError> {
            let call = self.infer_calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(dir) = &self.watch_dir {
                self.dir_counts.lock().unwrap().push(staged_files(dir));
            }
            let bytes = std::fs::read(image_path).unwrap_or_default();
            self.seen
                .lock()
                .unwrap()
                .push((image_path.to_path_buf(), bytes, prompt.to_string()));
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match self.plan.get(&call) {
                Some(Behavior::TimeOut) => Err(AnalysisError::Timeout(
                    "Analysis timed out after 120 seconds".into(),
                )),
                Some(Behavior::Panic) => panic!("backend exploded"),
                None => Ok(format!("summary #{call}")),
            }
        }
    }

    fn coordinator(dir: &Path, backend: Arc<FakeBackend>) -> BatchCoordinator {
        coordinator_with(dir, backend, |_| {})
    }

    fn coordinator_with(
        dir: &Path,
        backend: Arc<FakeBackend>,
        tweak: impl FnOnce(&mut AppConfig),
    ) -> BatchCoordinator {
        let mut config = AppConfig::default();
        config.uploads.dir = dir.to_path_buf();
        tweak(&mut config);
        BatchCoordinator::new(Arc::new(config), backend)
    }

    fn staged_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    /// Roughly `width * height * 3` bytes of PNG; noise does not compress.
    fn noisy_png(width: u32, height: u32) -> Vec<u8> {
        let mut state: u32 = 0x9e37_79b9;
        let img = image::RgbImage::from_fn(width, height, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let [r, g, b, _] = state.to_le_bytes();
            image::Rgb([r, g, b])
        });
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn request(name: &str, data: Vec<u8>) -> AnalysisRequest {
        AnalysisRequest::new(PendingUpload::new(name, data), None)
    }

    #[tokio::test]
    async fn valid_png_with_empty_prompt_uses_default_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::healthy());
        let coordinator = coordinator(dir.path(), backend.clone());

        let png = noisy_png(860, 820);
        assert!(png.len() > 2 * 1024 * 1024 - 100_000);
        let upload = PendingUpload::new("photo.png", png.clone());
        let req = AnalysisRequest::new(upload, Some("".into()));

        let report = coordinator.analyze(req).await.unwrap();
        assert!(!report.summary.is_empty());
        assert_eq!(report.filename, "photo.png");
        assert_eq!(report.file_size, png.len() as u64);
        assert_eq!(report.model, "llava:7b");

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].2, DEFAULT_PROMPT);
        // Preprocessed copy: re-encoded JPEG, not the uploaded PNG.
        assert!(seen[0].0.to_str().unwrap().ends_with("-optimized.jpg"));
        assert_eq!(image::guess_format(&seen[0].1).unwrap(), image::ImageFormat::Jpeg);
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn oversize_file_is_rejected_before_staging_or_network() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::healthy());
        let coordinator = coordinator(dir.path(), backend.clone());

        let err = coordinator
            .analyze(request("huge.png", vec![0u8; 20 * 1024 * 1024]))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Validation(_)));
        assert_eq!(backend.liveness_calls.load(Ordering::SeqCst), 0);
        assert_eq!(backend.infer_calls(), 0);
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn backend_down_short_circuits_infer() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::down());
        let coordinator = coordinator(dir.path(), backend.clone());

        let err = coordinator
            .analyze(request("a.png", noisy_png(32, 32)))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::ServiceUnavailable(_)));
        assert_eq!(backend.infer_calls(), 0);
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn missing_model_short_circuits_infer() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend {
            models: vec![ModelEntry {
                name: "mistral:latest".into(),
                size: None,
                modified_at: None,
            }],
            ..FakeBackend::healthy()
        });
        let coordinator = coordinator(dir.path(), backend.clone());

        let err = coordinator
            .analyze(request("a.png", noisy_png(32, 32)))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::ModelNotFound(_)));
        assert!(err.to_string().contains("llava:7b"));
        assert_eq!(backend.infer_calls(), 0);
    }

    #[tokio::test]
    async fn preprocessing_failure_still_infers_on_original_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::healthy());
        let coordinator = coordinator(dir.path(), backend.clone());

        let corrupt = b"\x89PNG but not really".to_vec();
        let outcome = coordinator.run_single(request("broken.png", corrupt.clone())).await;
        assert!(outcome.is_success());

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].1, corrupt);
        assert!(seen[0].0.to_str().unwrap().ends_with(".png"));
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn batch_isolates_a_timed_out_item() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend {
            plan: HashMap::from([(1, Behavior::TimeOut)]),
            ..FakeBackend::healthy()
        });
        let coordinator = coordinator(dir.path(), backend.clone());

        let outcome = coordinator
            .run_batch(vec![
                request("one.png", noisy_png(400, 300)),
                request("two.png", noisy_png(400, 300)),
                request("three.png", noisy_png(400, 300)),
            ])
            .await;

        assert_eq!(outcome.summary.total, 3);
        assert_eq!(outcome.summary.successful, 2);
        assert_eq!(outcome.summary.failed, 1);
        let names: Vec<_> = outcome.results.iter().map(|o| o.filename()).collect();
        assert_eq!(names, ["one.png", "two.png", "three.png"]);
        assert!(outcome.results[0].is_success());
        assert!(outcome.results[2].is_success());
        match &outcome.results[1] {
            AnalysisOutcome::Failure { error, .. } => assert!(error.contains("timed out")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn batch_counts_always_add_up() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend {
            plan: HashMap::from([(0, Behavior::TimeOut), (3, Behavior::TimeOut)]),
            ..FakeBackend::healthy()
        });
        let coordinator = coordinator(dir.path(), backend);

        let mut requests: Vec<_> = (0..5)
            .map(|i| request(&format!("{i}.png"), noisy_png(16, 16)))
            .collect();
        // Invalid items fail on their own without touching the backend.
        requests.push(request("notes.txt", b"hello".to_vec()));

        let outcome = coordinator.run_batch(requests).await;
        assert_eq!(outcome.results.len(), 6);
        assert_eq!(outcome.summary.successful + outcome.summary.failed, 6);
        assert_eq!(outcome.summary.failed, 3);
        assert_eq!(outcome.results[5].filename(), "notes.txt");
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn empty_batch_is_empty_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), Arc::new(FakeBackend::healthy()));
        let outcome = coordinator.run_batch(Vec::new()).await;
        assert_eq!(outcome.summary.total, 0);
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn default_batch_keeps_one_inference_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend {
            delay: Duration::from_millis(20),
            ..FakeBackend::healthy()
        });
        let coordinator = coordinator(dir.path(), backend.clone());

        let requests = (0..4).map(|i| request(&format!("{i}.png"), noisy_png(8, 8))).collect();
        coordinator.run_batch(requests).await;
        assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bounded_pool_respects_limit_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend {
            delay: Duration::from_millis(30),
            ..FakeBackend::healthy()
        });
        let coordinator =
            coordinator_with(dir.path(), backend.clone(), |c| c.batch.concurrency = 2);

        let requests = (0..6).map(|i| request(&format!("{i}.png"), noisy_png(8, 8))).collect();
        let outcome = coordinator.run_batch(requests).await;

        let max = backend.max_in_flight.load(Ordering::SeqCst);
        assert!(max >= 1 && max <= 2, "max in flight was {max}");
        let names: Vec<_> = outcome.results.iter().map(|o| o.filename().to_string()).collect();
        assert_eq!(names, ["0.png", "1.png", "2.png", "3.png", "4.png", "5.png"]);
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn panicking_backend_becomes_failure_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend {
            plan: HashMap::from([(0, Behavior::Panic)]),
            ..FakeBackend::healthy()
        });
        let coordinator = coordinator(dir.path(), backend);

        let outcome = coordinator.run_single(request("a.png", noisy_png(64, 64))).await;
        assert!(!outcome.is_success());
        assert_eq!(staged_files(dir.path()), 0);
    }

    /// Polls until the directory is empty or two seconds pass.
    async fn wait_until_empty(dir: &Path) -> usize {
        for _ in 0..100 {
            if staged_files(dir) == 0 {
                return 0;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        staged_files(dir)
    }

    #[tokio::test]
    async fn dropped_analysis_still_removes_its_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend {
            delay: Duration::from_secs(5),
            ..FakeBackend::healthy()
        });
        let coordinator = coordinator(dir.path(), backend.clone());

        let cut_short = tokio::time::timeout(
            Duration::from_millis(300),
            coordinator.analyze(request("slow.png", noisy_png(200, 150))),
        )
        .await;

        assert!(cut_short.is_err());
        assert_eq!(backend.infer_calls(), 1);
        assert_eq!(wait_until_empty(dir.path()).await, 0);
    }

    #[tokio::test]
    async fn failed_inference_removes_the_preprocessed_copy() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend {
            plan: HashMap::from([(0, Behavior::TimeOut)]),
            ..FakeBackend::healthy()
        });
        let coordinator = coordinator(dir.path(), backend.clone());

        let err = coordinator
            .analyze(request("big.png", noisy_png(1200, 900)))
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::Timeout(_)));
        let seen = backend.seen.lock().unwrap();
        assert!(seen[0].0.to_str().unwrap().ends_with("-optimized.jpg"));
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn each_item_is_released_before_the_next_is_staged() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend {
            plan: HashMap::from([(1, Behavior::TimeOut)]),
            watch_dir: Some(dir.path().to_path_buf()),
            ..FakeBackend::healthy()
        });
        let coordinator = coordinator(dir.path(), backend.clone());

        let requests = (0..4)
            .map(|i| request(&format!("{i}.png"), noisy_png(300, 200)))
            .collect();
        let outcome = coordinator.run_batch(requests).await;

        assert_eq!(outcome.summary.failed, 1);
        // Staged upload plus its preprocessed copy, never a previous item's files.
        assert_eq!(*backend.dir_counts.lock().unwrap(), [2, 2, 2, 2]);
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn disabled_preprocessing_sends_the_upload_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::healthy());
        let coordinator =
            coordinator_with(dir.path(), backend.clone(), |c| c.preprocessing.enabled = false);

        let png = noisy_png(20, 20);
        assert!(coordinator.run_single(request("a.png", png.clone())).await.is_success());
        assert_eq!(backend.seen.lock().unwrap()[0].1, png);
    }
}
