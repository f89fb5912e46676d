//! Batch orchestration: fans jobs out under a worker limit, drives each
//! through the pipeline and settles every one of them into a terminal state.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stock_tagger::ai::GeminiClient;
//! use stock_tagger::codec::RasterCodec;
//! use stock_tagger::credentials::CredentialRotator;
//! use stock_tagger::metadata::JpegMetadataWriter;
//! use stock_tagger::orchestrator::{BatchOrchestrator, BatchRun, LogReporter, PipelineSettings};
//! use stock_tagger::pipeline::JobInput;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let inputs = vec![JobInput::new("shoot/a.png"), JobInput::new("shoot/b.jpg")];
//!     let run = BatchRun::new(inputs, 3, "ready".as_ref(), "READY_")?;
//!     let orchestrator = BatchOrchestrator::new(
//!         Arc::new(RasterCodec::default()),
//!         Arc::new(GeminiClient::new("gemini-2.5-flash".into(), false)),
//!         Arc::new(JpegMetadataWriter),
//!         Arc::new(LogReporter),
//!         PipelineSettings::default(),
//!     );
//!     let credentials = CredentialRotator::from_csv("key-1, key-2");
//!     let summary = orchestrator.run(&run, &credentials).await?;
//!     println!("{} done, {} failed", summary.done, summary.failed);
//!     Ok(())
//! }
//! ```

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Semaphore;

use crate::ai::{InferenceClient, build_prompt};
use crate::codec::ImageCodec;
use crate::credentials::CredentialRotator;
use crate::error::{BatchError, JobError};
use crate::metadata::{MetadataWriter, staging_path};
use crate::pipeline::{
    self, CancelHandle, InferContext, Job, JobInput, JobSnapshot, JobStatus, RetryPolicy,
    SCRATCH_DIR_NAME,
};

/// Default longest edge of the image sent for inference.
pub const DEFAULT_MAX_EDGE: u32 = 1024;

/// Receives job state changes as they happen.
///
/// Called from inside the run; implementations should return quickly.
pub trait JobStateReporter: Send + Sync {
    fn on_transition(&self, job: &JobSnapshot);

    fn on_progress(&self, _completed: usize, _total: usize) {}
}

/// Reports through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl JobStateReporter for LogReporter {
    fn on_transition(&self, job: &JobSnapshot) {
        match (&job.detail, job.status) {
            (Some(detail), JobStatus::Failed) => {
                log::error!("[{}] {}: {detail}", job.id, job.display_name)
            }
            _ => log::info!("[{}] {}: {}", job.id, job.display_name, job.label),
        }
    }

    fn on_progress(&self, completed: usize, total: usize) {
        log::debug!("Progress {completed}/{total}");
    }
}

/// Knobs of the per-job pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub prompt: String,
    pub retry: RetryPolicy,
    /// Longest edge of the inference payload.
    pub max_edge: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            prompt: build_prompt(),
            retry: RetryPolicy::default(),
            max_edge: DEFAULT_MAX_EDGE,
        }
    }
}

/// One "start" of a batch: the jobs, the worker limit and the run's shared
/// flags. Preconditions are checked in [`BatchRun::new`], before any job
/// starts.
#[derive(Debug)]
pub struct BatchRun {
    jobs: Vec<Job>,
    workers: usize,
    output_dir: PathBuf,
    scratch_dir: PathBuf,
    cancel: CancelHandle,
    started: AtomicBool,
    completed: AtomicUsize,
}

impl BatchRun {
    /// Validate the run and prepare its directories.
    ///
    /// Fails on an empty input list, a zero worker count, or an output
    /// directory that cannot be created or written.
    pub fn new(
        inputs: Vec<JobInput>,
        workers: usize,
        output_dir: &Path,
        prefix: &str,
    ) -> Result<Self, BatchError> {
        if inputs.is_empty() {
            return Err(BatchError::NoFiles);
        }
        if workers == 0 {
            return Err(BatchError::InvalidWorkerCount);
        }

        let scratch_dir = output_dir.join(SCRATCH_DIR_NAME);
        let dir_error = |source| BatchError::OutputDir {
            path: output_dir.to_path_buf(),
            source,
        };
        std::fs::create_dir_all(&scratch_dir).map_err(dir_error)?;
        let probe = scratch_dir.join(".write-probe");
        std::fs::write(&probe, b"").map_err(dir_error)?;
        let _ = std::fs::remove_file(&probe);

        let jobs = inputs
            .iter()
            .zip(assign_destinations(&inputs, output_dir, prefix))
            .enumerate()
            .map(|(i, (input, destination))| Job::new(i + 1, input, destination))
            .collect();

        Ok(Self {
            jobs,
            workers,
            output_dir: output_dir.to_path_buf(),
            scratch_dir,
            cancel: CancelHandle::new(),
            started: AtomicBool::new(false),
            completed: AtomicUsize::new(0),
        })
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn total(&self) -> usize {
        self.jobs.len()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Handle for requesting a stop from another task or a signal handler.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Jobs that reached a terminal state.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Fraction of jobs settled, in `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        self.completed() as f64 / self.total().max(1) as f64
    }
}

/// One destination per input. Sources of different directories that share a
/// file name get numbered names (`READY_a-2.jpg`) in input order, avoiding
/// every name another input maps to on its own.
fn assign_destinations(inputs: &[JobInput], output_dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let natural: Vec<PathBuf> = inputs
        .iter()
        .map(|input| pipeline::destination_path(output_dir, prefix, &input.path))
        .collect();
    let reserved: HashSet<&PathBuf> = natural.iter().collect();
    let mut taken = HashSet::new();

    natural
        .iter()
        .map(|destination| {
            if taken.insert(destination.clone()) {
                return destination.clone();
            }
            let renamed = (2..)
                .map(|n| pipeline::numbered_path(destination, n))
                .find(|candidate| !reserved.contains(candidate) && !taken.contains(candidate))
                .unwrap_or_else(|| destination.clone());
            log::warn!(
                "{} is used by another input, writing to {}",
                destination.display(),
                renamed.display()
            );
            taken.insert(renamed.clone());
            renamed
        })
        .collect()
}

/// Final state of every job of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub jobs: Vec<Job>,
    pub done: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl RunSummary {
    fn from_jobs(jobs: Vec<Job>) -> Self {
        let count = |status| jobs.iter().filter(|j| j.status() == status).count();
        Self {
            done: count(JobStatus::Done),
            skipped: count(JobStatus::Skipped),
            failed: count(JobStatus::Failed),
            cancelled: count(JobStatus::Cancelled),
            jobs,
        }
    }

    pub fn total(&self) -> usize {
        self.jobs.len()
    }

    pub fn job(&self, id: usize) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }
}

/// Runs batches against injected collaborators.
pub struct BatchOrchestrator {
    codec: Arc<dyn ImageCodec>,
    client: Arc<dyn InferenceClient>,
    writer: Arc<dyn MetadataWriter>,
    reporter: Arc<dyn JobStateReporter>,
    settings: PipelineSettings,
}

impl BatchOrchestrator {
    pub fn new(
        codec: Arc<dyn ImageCodec>,
        client: Arc<dyn InferenceClient>,
        writer: Arc<dyn MetadataWriter>,
        reporter: Arc<dyn JobStateReporter>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            codec,
            client,
            writer,
            reporter,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Process every job of `run`. Returns once all of them are terminal.
    ///
    /// An empty credential pool is rejected before any job starts. A
    /// `BatchRun` is processed once; passing it again is rejected with
    /// [`BatchError::AlreadyStarted`], so start again with a fresh run.
    /// At most `run.workers()` jobs are between Sanitizing and Relocating at
    /// any moment. Job failures are recorded on the job and never abort the
    /// batch.
    pub async fn run(
        &self,
        run: &BatchRun,
        credentials: &CredentialRotator,
    ) -> Result<RunSummary, BatchError> {
        if credentials.is_empty() {
            return Err(BatchError::NoCredentials);
        }
        if run.started.swap(true, Ordering::SeqCst) {
            return Err(BatchError::AlreadyStarted);
        }

        log::info!(
            "Starting batch: {} image(s), {} worker(s), AI: {}",
            run.total(),
            run.workers(),
            self.client.name()
        );

        let gate = Semaphore::new(run.workers());
        let jobs = run
            .jobs()
            .iter()
            .cloned()
            .map(|job| self.process_job(run, credentials, &gate, job));
        let finished = futures::future::join_all(jobs).await;

        if let Err(e) = tokio::fs::remove_dir(run.scratch_dir()).await {
            log::debug!("Scratch dir {} kept: {e}", run.scratch_dir().display());
        }

        let summary = RunSummary::from_jobs(finished);
        log::info!(
            "Done: {} succeeded, {} skipped, {} failed, {} cancelled out of {} images",
            summary.done,
            summary.skipped,
            summary.failed,
            summary.cancelled,
            summary.total()
        );
        Ok(summary)
    }

    async fn process_job(
        &self,
        run: &BatchRun,
        credentials: &CredentialRotator,
        gate: &Semaphore,
        mut job: Job,
    ) -> Job {
        // Resume: a previous run already produced this file.
        if tokio::fs::try_exists(&job.destination).await.unwrap_or(false) {
            self.settle(run, &mut job, JobStatus::Skipped, None);
            return job;
        }

        let _permit = match gate.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                self.settle(run, &mut job, JobStatus::Cancelled, None);
                return job;
            }
        };

        let working = pipeline::working_path(run.scratch_dir(), job.id, job.source());
        let outcome = self
            .run_stages(run, credentials, &mut job, &working)
            .await;

        cleanup(&working).await;

        match outcome {
            Ok(()) => self.settle(run, &mut job, JobStatus::Done, None),
            Err(e) if e.is_cancellation() => {
                self.settle(run, &mut job, JobStatus::Cancelled, None)
            }
            Err(e) => self.settle(run, &mut job, JobStatus::Failed, Some(e.to_string())),
        }
        job
    }

    async fn run_stages(
        &self,
        run: &BatchRun,
        credentials: &CredentialRotator,
        job: &mut Job,
        working: &Path,
    ) -> Result<(), JobError> {
        self.enter(run, job, JobStatus::Sanitizing)?;
        pipeline::sanitize(self.codec.as_ref(), job.source(), working).await?;

        self.enter(run, job, JobStatus::Inferring)?;
        let ctx = InferContext {
            codec: self.codec.as_ref(),
            client: self.client.as_ref(),
            credentials,
            prompt: &self.settings.prompt,
            policy: &self.settings.retry,
            max_edge: self.settings.max_edge,
            cancel: &run.cancel,
        };
        let mut attempts = 0;
        let tagging = pipeline::infer(&ctx, working, &mut attempts).await;
        job.attempts = attempts;
        let tagging = tagging?;
        log::debug!("[{}] title: {}", job.id, tagging.title);

        self.enter(run, job, JobStatus::Embedding)?;
        pipeline::embed(self.writer.as_ref(), working, &tagging).await?;

        self.enter(run, job, JobStatus::Relocating)?;
        pipeline::relocate(working, &job.destination).await
    }

    /// Stage boundary: honor a pending stop, otherwise advance.
    fn enter(&self, run: &BatchRun, job: &mut Job, next: JobStatus) -> Result<(), JobError> {
        if run.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        self.transition(job, next);
        Ok(())
    }

    fn transition(&self, job: &mut Job, next: JobStatus) {
        if job.advance(next) {
            self.reporter.on_transition(&job.snapshot());
        } else {
            log::error!(
                "[{}] rejected transition {:?} -> {next:?}",
                job.id,
                job.status()
            );
        }
    }

    fn settle(&self, run: &BatchRun, job: &mut Job, status: JobStatus, detail: Option<String>) {
        job.last_error = detail;
        self.transition(job, status);
        let completed = run.completed.fetch_add(1, Ordering::SeqCst) + 1;
        self.reporter.on_progress(completed, run.total());
    }
}

/// Best-effort removal of a job's working copy and its staging file.
async fn cleanup(working: &Path) {
    for path in [working.to_path_buf(), staging_path(working)] {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => log::debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::debug!("Could not remove {}: {e}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::InferenceError;
    use crate::metadata::{EmbedOutcome, MetadataWriter};
    use crate::testing::{FakeCodec, FakeWriter, RecordingReporter, ScriptedClient, tagging_json};
    use std::time::Duration;
    use tempfile::TempDir;
    use JobStatus::*;

    struct Harness {
        dir: TempDir,
        codec: Arc<FakeCodec>,
        writer: Arc<FakeWriter>,
        reporter: Arc<RecordingReporter>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_writer(FakeWriter::default())
        }

        fn with_writer(writer: FakeWriter) -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                codec: Arc::new(FakeCodec::default()),
                writer: Arc::new(writer),
                reporter: Arc::new(RecordingReporter::default()),
            }
        }

        fn output_dir(&self) -> PathBuf {
            self.dir.path().join("ready")
        }

        /// Source files whose bytes are their own names, e.g. `job1`.
        fn inputs(&self, names: &[&str]) -> Vec<JobInput> {
            let src = self.dir.path().join("src");
            std::fs::create_dir_all(&src).unwrap();
            names
                .iter()
                .map(|name| {
                    let path = src.join(format!("{name}.png"));
                    std::fs::write(&path, name.as_bytes()).unwrap();
                    JobInput::new(path)
                })
                .collect()
        }

        fn batch(&self, names: &[&str], workers: usize) -> BatchRun {
            BatchRun::new(self.inputs(names), workers, &self.output_dir(), "READY_").unwrap()
        }

        fn orchestrator(&self, client: Arc<ScriptedClient>) -> BatchOrchestrator {
            self.orchestrator_with_writer(client, self.writer.clone())
        }

        fn orchestrator_with_writer(
            &self,
            client: Arc<ScriptedClient>,
            writer: Arc<dyn MetadataWriter>,
        ) -> BatchOrchestrator {
            let settings = PipelineSettings {
                prompt: "describe".into(),
                retry: RetryPolicy {
                    max_attempts: 3,
                    rate_limit_backoff: Duration::ZERO,
                    retry_safety_blocks: true,
                },
                max_edge: 64,
            };
            BatchOrchestrator::new(
                self.codec.clone(),
                client,
                writer,
                self.reporter.clone(),
                settings,
            )
        }

        fn destination(&self, name: &str) -> PathBuf {
            self.output_dir().join(format!("READY_{name}.png.jpg"))
        }
    }

    fn statuses(summary: &RunSummary) -> Vec<JobStatus> {
        summary.jobs.iter().map(|j| j.status()).collect()
    }

    // ── end-to-end scenarios ──────────────────────────────────────────

    #[tokio::test]
    async fn rate_limited_job_fails_without_affecting_siblings() {
        let h = Harness::new();
        let run = h.batch(&["job1", "job2", "job3"], 1);
        let client = Arc::new(ScriptedClient::new(|_, payload| {
            if payload == b"job2" {
                Err(InferenceError::RateLimited("429".into()))
            } else {
                Ok(tagging_json("Fine"))
            }
        }));
        let credentials = CredentialRotator::from_csv("K1");

        let summary = h.orchestrator(client.clone()).run(&run, &credentials).await.unwrap();

        assert_eq!(statuses(&summary), vec![Done, Failed, Done]);
        let failed = summary.job(2).unwrap();
        assert_eq!(failed.attempts, 3);
        assert!(
            failed
                .last_error
                .as_deref()
                .unwrap()
                .starts_with("Inference failed after 3 attempt(s)")
        );
        assert_eq!(client.calls(), 5);
        assert_eq!(run.completed(), 3);
        assert_eq!(run.progress(), 1.0);

        assert!(h.destination("job1").exists());
        assert!(!h.destination("job2").exists());
        assert!(h.destination("job3").exists());
    }

    #[tokio::test]
    async fn existing_destination_is_skipped_without_work() {
        let h = Harness::new();
        let run = h.batch(&["job1", "job2"], 2);
        std::fs::write(h.destination("job1"), b"from a previous run").unwrap();
        let client = Arc::new(ScriptedClient::new(|_, _| Ok(tagging_json("T"))));

        let summary = h
            .orchestrator(client.clone())
            .run(&run, &CredentialRotator::from_csv("K1"))
            .await
            .unwrap();

        assert_eq!(statuses(&summary), vec![Skipped, Done]);
        assert_eq!(h.reporter.history(1), vec![Skipped]);
        assert_eq!(h.codec.normalized(), 1);
        assert_eq!(client.calls(), 1);
        assert_eq!(h.writer.calls(), 1);
        assert_eq!(
            std::fs::read(h.destination("job1")).unwrap(),
            b"from a previous run"
        );
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.done, 1);
    }

    #[tokio::test]
    async fn every_job_walks_the_full_state_machine() {
        let h = Harness::new();
        let run = h.batch(&["a"], 1);
        let client = Arc::new(ScriptedClient::new(|_, _| Ok(tagging_json("T"))));

        h.orchestrator(client)
            .run(&run, &CredentialRotator::from_csv("K1"))
            .await
            .unwrap();

        assert_eq!(
            h.reporter.history(1),
            vec![Sanitizing, Inferring, Embedding, Relocating, Done]
        );
        assert_eq!(h.reporter.progress(), vec![(1, 1)]);
    }

    #[tokio::test]
    async fn worker_limit_bounds_active_jobs() {
        let h = Harness::new();
        let run = h.batch(&["a", "b", "c", "d", "e", "f"], 2);
        let client = Arc::new(
            ScriptedClient::new(|_, _| Ok(tagging_json("T")))
                .with_delay(Duration::from_millis(20)),
        );

        let summary = h
            .orchestrator(client)
            .run(&run, &CredentialRotator::from_csv("K1"))
            .await
            .unwrap();

        assert_eq!(summary.done, 6);
        assert_eq!(h.reporter.max_active(), 2);
    }

    #[tokio::test]
    async fn cancellation_stops_new_work_and_settles_everything() {
        let h = Harness::new();
        let run = h.batch(&["a", "b", "c"], 1);
        let cancel = run.cancel_handle();
        let client = Arc::new(ScriptedClient::new(move |_, _| {
            cancel.cancel();
            Ok(tagging_json("T"))
        }));

        let summary = h
            .orchestrator(client.clone())
            .run(&run, &CredentialRotator::from_csv("K1"))
            .await
            .unwrap();

        // Job 1 finishes its in-flight inference, then stops at the boundary.
        assert_eq!(h.reporter.history(1), vec![Sanitizing, Inferring, Cancelled]);
        for id in [2, 3] {
            assert_eq!(h.reporter.history(id), vec![Cancelled]);
        }
        assert_eq!(summary.cancelled, 3);
        assert_eq!(client.calls(), 1);
        assert_eq!(h.codec.normalized(), 1);
        assert_eq!(run.completed(), 3);
        assert!(!run.scratch_dir().exists());
    }

    #[tokio::test]
    async fn invalid_credential_fails_after_one_call() {
        let h = Harness::new();
        let run = h.batch(&["a"], 1);
        let client = Arc::new(ScriptedClient::new(|_, _| {
            Err(InferenceError::InvalidCredential("API_KEY_INVALID".into()))
        }));

        let summary = h
            .orchestrator(client.clone())
            .run(&run, &CredentialRotator::from_csv("K1,K2"))
            .await
            .unwrap();

        assert_eq!(statuses(&summary), vec![Failed]);
        assert_eq!(client.calls(), 1);
        assert_eq!(summary.jobs[0].attempts, 1);
    }

    #[tokio::test]
    async fn corrupt_input_fails_before_inference() {
        let h = Harness::new();
        let run = h.batch(&["corrupt", "fine"], 2);
        let client = Arc::new(ScriptedClient::new(|_, _| Ok(tagging_json("T"))));

        let summary = h
            .orchestrator(client.clone())
            .run(&run, &CredentialRotator::from_csv("K1"))
            .await
            .unwrap();

        assert_eq!(statuses(&summary), vec![Failed, Done]);
        assert!(
            summary.jobs[0]
                .last_error
                .as_deref()
                .unwrap()
                .starts_with("Corrupt input image")
        );
        assert_eq!(client.calls(), 1);
        assert_eq!(h.reporter.history(1), vec![Sanitizing, Failed]);
    }

    #[tokio::test]
    async fn embed_failure_leaves_nothing_at_destination() {
        let h = Harness::with_writer(FakeWriter::failing("disk full"));
        let run = h.batch(&["a"], 1);
        let client = Arc::new(ScriptedClient::new(|_, _| Ok(tagging_json("T"))));

        let summary = h
            .orchestrator(client)
            .run(&run, &CredentialRotator::from_csv("K1"))
            .await
            .unwrap();

        assert_eq!(statuses(&summary), vec![Failed]);
        assert_eq!(
            summary.jobs[0].last_error.as_deref(),
            Some("Failed to write metadata: disk full")
        );
        assert!(!h.destination("a").exists());
    }

    #[tokio::test]
    async fn working_copies_are_cleaned_up() {
        let h = Harness::new();
        let run = h.batch(&["a", "b"], 2);
        let client = Arc::new(ScriptedClient::new(|_, payload| {
            if payload == b"a" {
                Err(InferenceError::Transport("reset".into()))
            } else {
                Ok(tagging_json("T"))
            }
        }));

        h.orchestrator(client)
            .run(&run, &CredentialRotator::from_csv("K1"))
            .await
            .unwrap();

        assert!(!run.scratch_dir().exists());
        let names: Vec<_> = std::fs::read_dir(h.output_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["READY_b.png.jpg"]);
    }

    #[tokio::test]
    async fn same_stem_sources_keep_separate_outputs() {
        let h = Harness::new();
        let src = h.dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("a.jpg"), b"jpg-source").unwrap();
        std::fs::write(src.join("a.png"), b"png-source").unwrap();
        let inputs = || vec![JobInput::new(src.join("a.jpg")), JobInput::new(src.join("a.png"))];
        let client = Arc::new(ScriptedClient::new(|_, _| Ok(tagging_json("T"))));
        let orchestrator = h.orchestrator(client.clone());
        let credentials = CredentialRotator::from_csv("K1");

        let first = BatchRun::new(inputs(), 1, &h.output_dir(), "READY_").unwrap();
        let summary = orchestrator.run(&first, &credentials).await.unwrap();
        assert_eq!(statuses(&summary), vec![Done, Done]);
        assert_eq!(
            std::fs::read(h.output_dir().join("READY_a.jpg")).unwrap(),
            b"jpg-source"
        );
        assert_eq!(
            std::fs::read(h.output_dir().join("READY_a.png.jpg")).unwrap(),
            b"png-source"
        );

        // Resuming skips each job only because of its own output.
        std::fs::remove_file(h.output_dir().join("READY_a.png.jpg")).unwrap();
        let second = BatchRun::new(inputs(), 1, &h.output_dir(), "READY_").unwrap();
        let summary = orchestrator.run(&second, &credentials).await.unwrap();
        assert_eq!(statuses(&summary), vec![Skipped, Done]);
        assert_eq!(client.calls(), 3);
    }

    #[test]
    fn same_file_name_in_two_directories_gets_numbered() {
        let dir = TempDir::new().unwrap();
        let run = BatchRun::new(
            vec![
                JobInput::new("/shoot/day1/a.jpg"),
                JobInput::new("/shoot/day2/a.jpg"),
                JobInput::new("/shoot/a-2.jpg"),
            ],
            1,
            dir.path(),
            "READY_",
        )
        .unwrap();

        let destinations: Vec<_> = run.jobs().iter().map(|j| j.destination.clone()).collect();
        assert_eq!(
            destinations,
            vec![
                dir.path().join("READY_a.jpg"),
                dir.path().join("READY_a-3.jpg"),
                dir.path().join("READY_a-2.jpg"),
            ]
        );
    }

    #[tokio::test]
    async fn a_run_is_processed_only_once() {
        let h = Harness::new();
        let run = h.batch(&["a"], 1);
        let client = Arc::new(ScriptedClient::new(|_, _| Ok(tagging_json("T"))));
        let orchestrator = h.orchestrator(client.clone());
        let credentials = CredentialRotator::from_csv("K1");

        orchestrator.run(&run, &credentials).await.unwrap();
        let err = orchestrator.run(&run, &credentials).await.unwrap_err();

        assert!(matches!(err, BatchError::AlreadyStarted));
        assert_eq!(run.completed(), 1);
        assert_eq!(run.progress(), 1.0);
        assert_eq!(client.calls(), 1);
        assert_eq!(h.reporter.progress(), vec![(1, 1)]);
    }

    /// Puts a directory where the job's output should go, after the skip
    /// check has already passed.
    struct OccupyDestination(PathBuf);

    #[async_trait::async_trait]
    impl MetadataWriter for OccupyDestination {
        async fn embed(&self, _path: &Path, _title: &str, _keywords: &str) -> EmbedOutcome {
            std::fs::create_dir_all(&self.0).unwrap();
            EmbedOutcome::ok("embedded")
        }
    }

    #[tokio::test]
    async fn relocate_failure_is_settled_once_and_cleaned_up() {
        let h = Harness::new();
        let run = h.batch(&["a"], 1);
        let client = Arc::new(ScriptedClient::new(|_, _| Ok(tagging_json("T"))));
        let orchestrator =
            h.orchestrator_with_writer(client, Arc::new(OccupyDestination(h.destination("a"))));

        let summary = orchestrator
            .run(&run, &CredentialRotator::from_csv("K1"))
            .await
            .unwrap();

        assert_eq!(statuses(&summary), vec![Failed]);
        assert_eq!(
            h.reporter.history(1),
            vec![Sanitizing, Inferring, Embedding, Relocating, Failed]
        );
        assert!(
            summary.jobs[0]
                .last_error
                .as_deref()
                .unwrap()
                .starts_with("Failed to move file to")
        );
        assert_eq!(run.completed(), 1);
        assert_eq!(h.reporter.progress(), vec![(1, 1)]);
        assert!(!run.scratch_dir().exists());
    }

    #[tokio::test]
    async fn summary_serializes_to_json() {
        let h = Harness::new();
        let run = h.batch(&["a"], 1);
        let client = Arc::new(ScriptedClient::new(|_, _| Ok(tagging_json("T"))));

        let summary = h
            .orchestrator(client)
            .run(&run, &CredentialRotator::from_csv("K1"))
            .await
            .unwrap();

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["done"], 1);
        assert_eq!(json["jobs"][0]["status"], "done");
        assert_eq!(json["jobs"][0]["display_name"], "a.png");
    }

    // ── preconditions ─────────────────────────────────────────────────

    #[tokio::test]
    async fn run_requires_credentials() {
        let h = Harness::new();
        let run = h.batch(&["a"], 1);
        let client = Arc::new(ScriptedClient::new(|_, _| Ok(tagging_json("T"))));

        let err = h
            .orchestrator(client.clone())
            .run(&run, &CredentialRotator::from_csv(" , "))
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::NoCredentials));
        assert_eq!(client.calls(), 0);
        assert_eq!(run.completed(), 0);
    }

    #[test]
    fn run_requires_files() {
        let dir = TempDir::new().unwrap();
        let err = BatchRun::new(Vec::new(), 1, dir.path(), "READY_").unwrap_err();
        assert!(matches!(err, BatchError::NoFiles));
    }

    #[test]
    fn run_requires_a_worker() {
        let dir = TempDir::new().unwrap();
        let err =
            BatchRun::new(vec![JobInput::new("a.jpg")], 0, dir.path(), "READY_").unwrap_err();
        assert!(matches!(err, BatchError::InvalidWorkerCount));
    }

    #[test]
    fn run_requires_usable_output_dir() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let err = BatchRun::new(vec![JobInput::new("a.jpg")], 1, &blocker, "READY_").unwrap_err();
        assert!(matches!(err, BatchError::OutputDir { .. }));
    }

    #[test]
    fn new_run_starts_pending() {
        let dir = TempDir::new().unwrap();
        let run = BatchRun::new(
            vec![JobInput::new("/in/a.jpg"), JobInput::new("/in/b.webp")],
            4,
            dir.path(),
            "READY_",
        )
        .unwrap();

        assert_eq!(run.total(), 2);
        assert_eq!(run.completed(), 0);
        assert_eq!(run.progress(), 0.0);
        assert!(run.jobs().iter().all(|j| j.status() == Pending));
        assert_eq!(run.jobs()[1].destination, dir.path().join("READY_b.webp.jpg"));
        assert_eq!(run.jobs()[1].id, 2);
    }
}
