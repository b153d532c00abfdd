use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DecodeOptions, JobPriority, JobStatus, TaskType, TranscriptionResult};

/// Store-assigned job identifier. Monotonic within a single store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i64);

impl JobId {
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the media bytes for a job come from: a file already staged on
/// local disk, or a URL the processor still has to download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ref", rename_all = "snake_case")]
pub enum MediaSource {
    LocalPath(String),
    RemoteUrl(String),
}

impl MediaSource {
    pub fn kind(&self) -> &'static str {
        match self {
            MediaSource::LocalPath(_) => "local_path",
            MediaSource::RemoteUrl(_) => "remote_url",
        }
    }

    pub fn reference(&self) -> &str {
        match self {
            MediaSource::LocalPath(p) => p,
            MediaSource::RemoteUrl(u) => u,
        }
    }

    pub fn from_parts(kind: &str, reference: String) -> Result<Self, String> {
        match kind {
            "local_path" => Ok(MediaSource::LocalPath(reference)),
            "remote_url" => Ok(MediaSource::RemoteUrl(reference)),
            other => Err(format!("Invalid media source kind: {}", other)),
        }
    }
}

/// The durable record of an ASR request and its outcome.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub engine_name: String,
    pub task_type: TaskType,
    pub source: MediaSource,
    /// Submitted URL, retained verbatim for audit even after crawler
    /// resolution rewrites the effective source.
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size_bytes: Option<i64>,
    pub file_duration: Option<f64>,
    pub platform: Option<String>,
    pub language: Option<String>,
    pub decode_options: DecodeOptions,
    pub result: Option<TranscriptionResult>,
    pub error_message: Option<String>,
    pub task_processing_time: Option<f64>,
    pub callback_url: Option<String>,
    pub callback_status_code: Option<i32>,
    pub callback_message: Option<String>,
    pub callback_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn has_callback(&self) -> bool {
        self.callback_url.as_deref().is_some_and(|u| !u.is_empty())
    }
}

/// Everything the intake layer knows about a job before the store
/// assigns it an id and timestamps.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub engine_name: String,
    pub task_type: TaskType,
    pub priority: JobPriority,
    pub source: MediaSource,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size_bytes: Option<i64>,
    pub file_duration: Option<f64>,
    pub platform: Option<String>,
    pub decode_options: DecodeOptions,
    pub callback_url: Option<String>,
}

/// Partial update applied by the processor while a job is live.
/// Status changes ride through the store's transition guard.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub file_name: Option<String>,
    pub file_size_bytes: Option<i64>,
    pub file_duration: Option<f64>,
    pub language: Option<String>,
}

impl JobPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.file_name.is_none()
            && self.file_size_bytes.is_none()
            && self.file_duration.is_none()
            && self.language.is_none()
    }
}
