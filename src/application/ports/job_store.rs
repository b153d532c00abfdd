use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Job, JobId, JobPatch, JobQuery, NewJob, TranscriptionResult};

/// Durable record of every job and its lifecycle fields. The store is the
/// single source of truth for job ownership: `claim_next` is the only way
/// a processor may take a queued job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a new row in `queued` state and returns it with its
    /// assigned id and timestamps.
    async fn create(&self, new_job: NewJob) -> Result<Job, StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    async fn query(&self, filter: &JobQuery) -> Result<Vec<Job>, StoreError>;

    /// Returns `true` if a row was deleted, `false` if the id was unknown.
    async fn delete(&self, id: JobId) -> Result<bool, StoreError>;

    /// Partial update. A status change in the patch must be a legal
    /// transition from the row's current status or the call fails with
    /// `StoreError::IllegalTransition`.
    async fn update(&self, id: JobId, patch: JobPatch) -> Result<Job, StoreError>;

    /// Atomically claims the oldest queued job of the highest priority
    /// for the given engine, transitioning it to `processing`. Returns
    /// `None` when the queue is empty.
    async fn claim_next(&self, engine_name: &str) -> Result<Option<Job>, StoreError>;

    /// Terminal success write: result, detected language, and wall-clock
    /// processing time. Only legal from `processing`.
    async fn mark_completed(
        &self,
        id: JobId,
        result: &TranscriptionResult,
        language: Option<&str>,
        processing_time: f64,
    ) -> Result<(), StoreError>;

    /// Terminal failure write. Legal from `queued` (async staging
    /// failure) and `processing`.
    async fn mark_failed(
        &self,
        id: JobId,
        error_message: &str,
        processing_time: Option<f64>,
    ) -> Result<(), StoreError>;

    /// Records a callback delivery outcome. A terminal 2xx outcome is
    /// write-once; later writes are silently ignored.
    async fn record_callback(
        &self,
        id: JobId,
        status_code: i32,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Crash recovery: re-queues every `processing` row whose
    /// `updated_at` is older than the threshold. Returns how many rows
    /// moved.
    async fn requeue_orphans(&self, older_than: chrono::Duration) -> Result<u64, StoreError>;

    /// Terminal jobs with a callback URL and no recorded outcome; used to
    /// re-derive the dispatcher queue after a restart.
    async fn pending_callbacks(&self) -> Result<Vec<Job>, StoreError>;

    /// Staged paths of all non-terminal jobs; used by the staging
    /// reconciler to decide which files are still live.
    async fn active_local_paths(&self) -> Result<Vec<String>, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("query failed: {0}")]
    QueryFailed(String),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("illegal status transition for job {id}: {from} -> {to}")]
    IllegalTransition {
        id: JobId,
        from: String,
        to: String,
    },
    #[error("corrupt row for job {0}: {1}")]
    CorruptRow(JobId, String),
}

impl StoreError {
    /// Transient errors are worth a processor-level retry; everything
    /// else bubbles up.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::ConnectionFailed(_) | StoreError::QueryFailed(_)
        )
    }
}
