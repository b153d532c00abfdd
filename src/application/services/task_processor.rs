use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

use crate::application::ports::{
    EngineError, JobStore, MediaProcessor, Staging, StagingError, StoreError,
};
use crate::application::services::model_pool::{ModelPool, PoolError};
use crate::domain::{Job, JobId, JobPatch, MediaSource, TranscriptionResult};

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub engine_name: String,
    /// Upper bound on simultaneously processing jobs; each slot runs one
    /// serial pipeline.
    pub max_concurrent_tasks: usize,
    /// Poll period when the queue is empty. A fraction of jitter is
    /// added so slots do not hammer the store in lockstep.
    pub status_check_interval: Duration,
    /// Overall per-job deadline; `None` disables it.
    pub job_deadline: Option<Duration>,
    /// `processing` rows older than this at startup are considered
    /// orphaned and re-queued.
    pub recovery_threshold: chrono::Duration,
    /// How long staged files linger after their job resolves.
    pub staged_file_ttl: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            engine_name: "whisper_cli".into(),
            max_concurrent_tasks: 3,
            status_check_interval: Duration::from_secs(3),
            job_deadline: None,
            recovery_threshold: chrono::Duration::minutes(10),
            staged_file_ttl: Duration::from_secs(5),
        }
    }
}

/// Moves jobs through their lifecycle: claim by priority, stage, probe,
/// infer on a pooled worker, persist the outcome, clean up, notify.
pub struct TaskProcessor {
    store: Arc<dyn JobStore>,
    pool: Arc<ModelPool>,
    staging: Arc<dyn Staging>,
    media: Arc<dyn MediaProcessor>,
    callbacks: mpsc::Sender<JobId>,
    wakeup: Arc<Notify>,
    shutdown: watch::Receiver<bool>,
    config: ProcessorConfig,
}

impl TaskProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn JobStore>,
        pool: Arc<ModelPool>,
        staging: Arc<dyn Staging>,
        media: Arc<dyn MediaProcessor>,
        callbacks: mpsc::Sender<JobId>,
        wakeup: Arc<Notify>,
        shutdown: watch::Receiver<bool>,
        config: ProcessorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            pool,
            staging,
            media,
            callbacks,
            wakeup,
            shutdown,
            config,
        })
    }

    /// Crash recovery, then one claim loop per concurrency slot.
    pub async fn start(self: Arc<Self>) -> Result<Vec<JoinHandle<()>>, StoreError> {
        let requeued = self
            .store
            .requeue_orphans(self.config.recovery_threshold)
            .await?;
        if requeued > 0 {
            info!(requeued, "Re-queued orphaned jobs from previous run");
        }

        let handles = (0..self.config.max_concurrent_tasks)
            .map(|slot| {
                let processor = Arc::clone(&self);
                tokio::spawn(async move { processor.run_slot(slot).await })
            })
            .collect();
        Ok(handles)
    }

    async fn run_slot(self: Arc<Self>, slot: usize) {
        info!(slot, engine = %self.config.engine_name, "Task slot started");
        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.store.claim_next(&self.config.engine_name).await {
                Ok(Some(job)) => {
                    let span = tracing::info_span!(
                        "job_pipeline",
                        job_id = %job.id,
                        slot,
                        priority = %job.priority,
                        task_type = %job.task_type,
                    );
                    self.process(job).instrument(span).await;
                }
                Ok(None) => {
                    let sleep = self.poll_sleep();
                    tokio::select! {
                        _ = self.wakeup.notified() => {}
                        _ = tokio::time::sleep(sleep) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(slot, error = %e, "Transient store error while claiming, backing off");
                    tokio::time::sleep(self.config.status_check_interval).await;
                }
                Err(e) => {
                    error!(slot, error = %e, "Store error while claiming");
                    tokio::time::sleep(self.config.status_check_interval).await;
                }
            }
        }
        info!(slot, "Task slot stopped");
    }

    fn poll_sleep(&self) -> Duration {
        let base = self.config.status_check_interval;
        let jitter_ms = rand::rng().random_range(0..=base.as_millis().max(1) as u64 / 4);
        base + Duration::from_millis(jitter_ms)
    }

    /// One full pipeline. Errors are confined to this job: the slot
    /// records the failure and moves on.
    async fn process(&self, job: Job) {
        let job_id = job.id;
        let callback_wanted = job.has_callback();
        let started = Instant::now();

        let outcome = self.run_pipeline(&job, started).await;
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok(completed) => {
                let language = completed
                    .result
                    .detected_language()
                    .map(str::to_owned)
                    .or_else(|| job.decode_options.language.clone());
                if let Err(e) = self
                    .store
                    .mark_completed(job_id, &completed.result, language.as_deref(), elapsed)
                    .await
                {
                    error!(job_id = %job_id, error = %e, "Failed to persist completed result");
                } else {
                    info!(
                        job_id = %job_id,
                        elapsed_s = format!("{:.2}", elapsed),
                        "Job completed"
                    );
                }
                if let Some(path) = completed.staged_path {
                    self.staging
                        .schedule_delete(path, self.config.staged_file_ttl);
                }
            }
            Err(failure) => {
                let message = failure.error.to_string();
                warn!(job_id = %job_id, error = %message, "Job failed");
                if let Err(e) = self
                    .store
                    .mark_failed(job_id, &message, Some(elapsed))
                    .await
                {
                    error!(job_id = %job_id, error = %e, "Failed to persist job failure");
                }
                if let Some(path) = failure.staged_path {
                    self.staging
                        .schedule_delete(path, self.config.staged_file_ttl);
                }
            }
        }

        if callback_wanted {
            if let Err(e) = self.callbacks.send(job_id).await {
                warn!(job_id = %job_id, error = %e, "Callback queue unavailable");
            }
        }
    }

    async fn run_pipeline(
        &self,
        job: &Job,
        started: Instant,
    ) -> Result<PipelineSuccess, PipelineFailure> {
        // Step 1: decode options were vetted at intake; a row edited
        // behind our back still fails here instead of inside the decoder.
        if let Err(reason) = job.decode_options.validate() {
            return Err(PipelineFailure::bare(PipelineError::Validation(reason)));
        }

        // Step 2: make sure the media is on local disk.
        let staged_path = match &job.source {
            MediaSource::LocalPath(path) => {
                let path = PathBuf::from(path);
                if !path.exists() {
                    return Err(PipelineFailure::bare(PipelineError::Staging(
                        StagingError::DownloadFailed(format!(
                            "staged file missing: {}",
                            path.display()
                        )),
                    )));
                }
                path
            }
            MediaSource::RemoteUrl(url) => self
                .staging
                .stage_url(url, job.platform.as_deref())
                .await
                .map_err(|e| PipelineFailure::bare(PipelineError::Staging(e)))?,
        };

        // Step 3: stamp file metadata the intake could not know yet.
        if let Err(e) = self.record_file_metadata(job, &staged_path).await {
            return Err(PipelineFailure::staged(staged_path, e));
        }

        // Steps 4-5: inference on a pooled worker, one retry on a fresh
        // worker after a transient device error.
        let deadline = self
            .config
            .job_deadline
            .map(|d| d.saturating_sub(started.elapsed()));
        match self.infer_with_retry(job, &staged_path, deadline).await {
            Ok(result) => Ok(PipelineSuccess {
                result,
                staged_path: Some(staged_path),
            }),
            Err(e) => Err(PipelineFailure::staged(staged_path, e)),
        }
    }

    async fn record_file_metadata(
        &self,
        job: &Job,
        staged_path: &PathBuf,
    ) -> Result<(), PipelineError> {
        let mut patch = JobPatch::default();
        if job.file_name.is_none() {
            patch.file_name = staged_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned());
        }
        if job.file_size_bytes.is_none() {
            let meta = tokio::fs::metadata(staged_path)
                .await
                .map_err(|e| PipelineError::Staging(StagingError::Io(e)))?;
            patch.file_size_bytes = Some(meta.len() as i64);
        }
        if job.file_duration.is_none() {
            let duration = self
                .media
                .probe_duration(staged_path)
                .await
                .map_err(PipelineError::Media)?;
            patch.file_duration = Some(duration);
        }
        if patch.is_empty() {
            return Ok(());
        }
        self.store
            .update(job.id, patch)
            .await
            .map(|_| ())
            .map_err(PipelineError::Store)
    }

    async fn infer_with_retry(
        &self,
        job: &Job,
        staged_path: &PathBuf,
        deadline: Option<Duration>,
    ) -> Result<TranscriptionResult, PipelineError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let lease = self.pool.checkout().await.map_err(PipelineError::Pool)?;
            let instance = lease.worker().instance();
            let worker_id = lease.worker().id;
            let path = staged_path.clone();
            let task = job.task_type;
            let options = job.decode_options.clone();

            let mut handle =
                tokio::task::spawn_blocking(move || instance.infer(&path, task, &options));

            let joined = match deadline {
                Some(remaining) => {
                    match tokio::time::timeout(remaining, &mut handle).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            // The blocking call cannot be interrupted; the
                            // worker may still be inferring, so it must
                            // never be reissued.
                            handle.abort();
                            let _ = lease.discard().await;
                            return Err(PipelineError::DeadlineExceeded);
                        }
                    }
                }
                None => (&mut handle).await,
            };

            match joined {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) if e.is_transient() && attempts == 1 => {
                    warn!(
                        job_id = %job.id,
                        worker_id,
                        error = %e,
                        "Transient device error, retrying once on a fresh worker"
                    );
                    lease.discard().await.map_err(PipelineError::Pool)?;
                }
                Ok(Err(e)) => {
                    if e.is_transient() {
                        let _ = lease.discard().await;
                    }
                    return Err(PipelineError::Engine(e));
                }
                Err(join_error) => {
                    // A panicked inference leaves the instance in an
                    // unknown state.
                    let _ = lease.discard().await;
                    return Err(PipelineError::Panicked(join_error.to_string()));
                }
            }
        }
    }
}

struct PipelineSuccess {
    result: TranscriptionResult,
    staged_path: Option<PathBuf>,
}

struct PipelineFailure {
    error: PipelineError,
    staged_path: Option<PathBuf>,
}

impl PipelineFailure {
    fn bare(error: PipelineError) -> Self {
        Self {
            error,
            staged_path: None,
        }
    }

    fn staged(path: PathBuf, error: PipelineError) -> Self {
        Self {
            error,
            staged_path: Some(path),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum PipelineError {
    #[error("invalid decode options: {0}")]
    Validation(String),
    #[error("staging failed: {0}")]
    Staging(#[from] StagingError),
    #[error("media probe failed: {0}")]
    Media(#[from] crate::application::ports::MediaError),
    #[error("model pool: {0}")]
    Pool(#[from] PoolError),
    #[error("inference failed: {0}")]
    Engine(#[from] EngineError),
    #[error("store write failed: {0}")]
    Store(#[from] StoreError),
    #[error("job deadline exceeded")]
    DeadlineExceeded,
    #[error("inference panicked: {0}")]
    Panicked(String),
}
