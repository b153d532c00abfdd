#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use narvik::application::ports::JobStore;
use narvik::domain::{DecodeOptions, Job, JobId, JobPriority, JobStatus, MediaSource, NewJob, TaskType};
use narvik::infrastructure::persistence::SqliteJobStore;
use narvik::infrastructure::staging::{LocalStagingArea, StagingConfig};

pub async fn sqlite_store() -> (TempDir, Arc<SqliteJobStore>) {
    let dir = TempDir::new().expect("create temp dir");
    let store = SqliteJobStore::connect(&dir.path().join("jobs.db"))
        .await
        .expect("connect sqlite store");
    (dir, Arc::new(store))
}

pub fn staging_area(dir: &TempDir, max_file_size: u64) -> Arc<LocalStagingArea> {
    staging_area_with(dir, max_file_size, Vec::new(), Duration::from_secs(3600))
}

pub fn staging_area_with(
    dir: &TempDir,
    max_file_size: u64,
    allowed_extensions: Vec<String>,
    reconcile_grace: Duration,
) -> Arc<LocalStagingArea> {
    Arc::new(
        LocalStagingArea::new(StagingConfig {
            dir: dir.path().to_path_buf(),
            max_file_size,
            allowed_extensions,
            max_concurrent_downloads: 2,
            download_retries: 1,
            retry_base_delay: Duration::from_millis(10),
            reconcile_grace,
            platform_http: HashMap::new(),
        })
        .expect("create staging area"),
    )
}

pub fn sample_job(engine_name: &str, source: MediaSource) -> NewJob {
    NewJob {
        engine_name: engine_name.to_string(),
        task_type: TaskType::Transcribe,
        priority: JobPriority::Normal,
        source,
        file_url: None,
        file_name: Some("sample.wav".to_string()),
        file_size_bytes: Some(1024),
        file_duration: Some(12.5),
        platform: None,
        decode_options: DecodeOptions::default(),
        callback_url: None,
    }
}

pub fn with_priority(mut job: NewJob, priority: JobPriority) -> NewJob {
    job.priority = priority;
    job
}

pub fn with_callback(mut job: NewJob, url: &str) -> NewJob {
    job.callback_url = Some(url.to_string());
    job
}

/// Writes a small media payload into the staging dir and returns a job
/// whose source points at it.
pub async fn staged_media_job(engine_name: &str, staging_dir: &TempDir, stem: &str) -> NewJob {
    let path: PathBuf = staging_dir.path().join(format!("{}.wav", stem));
    tokio::fs::write(&path, b"RIFF....WAVEfmt fake-audio-bytes")
        .await
        .expect("write staged media");
    let mut job = sample_job(
        engine_name,
        MediaSource::LocalPath(path.to_string_lossy().into_owned()),
    );
    job.file_name = Some(format!("{}.wav", stem));
    job
}

/// Polls the store until the job reaches a terminal status.
pub async fn wait_for_terminal(store: &Arc<SqliteJobStore>, id: JobId, timeout: Duration) -> Job {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = store
            .get(id)
            .await
            .expect("fetch job")
            .expect("job exists");
        if job.status.is_terminal() {
            return job;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "job {} still {} after {:?}",
                id, job.status, timeout
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub async fn wait_for_status(
    store: &Arc<SqliteJobStore>,
    id: JobId,
    status: JobStatus,
    timeout: Duration,
) -> Job {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = store
            .get(id)
            .await
            .expect("fetch job")
            .expect("job exists");
        if job.status == status {
            return job;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "job {} still {} (wanted {}) after {:?}",
                id, job.status, status, timeout
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
