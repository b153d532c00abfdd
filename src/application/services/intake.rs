use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{info, warn};

use crate::application::ports::{
    JobStore, MediaProcessor, PlatformResolver, Staging, StagingError, StoreError,
};
use crate::domain::{DecodeOptions, Job, JobPriority, MediaSource, NewJob, TaskType};

/// Caller-supplied job parameters, identical across intake variants.
#[derive(Debug, Clone)]
pub struct TaskParams {
    pub task_type: TaskType,
    pub priority: JobPriority,
    pub decode_options: DecodeOptions,
    pub callback_url: Option<String>,
}

/// Translates external requests into queued job rows and staged files,
/// then nudges the processor awake.
pub struct IntakeService {
    store: Arc<dyn JobStore>,
    staging: Arc<dyn Staging>,
    media: Arc<dyn MediaProcessor>,
    resolvers: HashMap<String, Arc<dyn PlatformResolver>>,
    engine_name: String,
    wakeup: Arc<Notify>,
}

impl IntakeService {
    pub fn new(
        store: Arc<dyn JobStore>,
        staging: Arc<dyn Staging>,
        media: Arc<dyn MediaProcessor>,
        resolvers: Vec<Arc<dyn PlatformResolver>>,
        engine_name: String,
        wakeup: Arc<Notify>,
    ) -> Self {
        let resolvers = resolvers
            .into_iter()
            .map(|r| (r.platform().to_string(), r))
            .collect();
        Self {
            store,
            staging,
            media,
            resolvers,
            engine_name,
            wakeup,
        }
    }

    /// Upload intake. The handler has already streamed the bytes into
    /// `staged`; this validates, probes, and creates the row, removing
    /// the staged file again if anything is rejected.
    pub async fn create_upload_job(
        &self,
        staged: PathBuf,
        declared_name: &str,
        params: TaskParams,
    ) -> Result<Job, IntakeError> {
        if let Err(e) = self.validate_params(&params) {
            self.discard_staged(&staged);
            return Err(e);
        }

        let size = match tokio::fs::metadata(&staged).await {
            Ok(meta) => meta.len() as i64,
            Err(e) => {
                self.discard_staged(&staged);
                return Err(IntakeError::Staging(StagingError::Io(e)));
            }
        };
        let duration = match self.media.probe_duration(&staged).await {
            Ok(d) => d,
            Err(e) => {
                self.discard_staged(&staged);
                return Err(IntakeError::Validation(format!(
                    "unreadable media file: {}",
                    e
                )));
            }
        };

        let new_job = NewJob {
            engine_name: self.engine_name.clone(),
            task_type: params.task_type,
            priority: params.priority,
            source: MediaSource::LocalPath(staged.to_string_lossy().into_owned()),
            file_url: None,
            file_name: Some(declared_name.to_string()),
            file_size_bytes: Some(size),
            file_duration: Some(duration),
            platform: None,
            decode_options: params.decode_options,
            callback_url: params.callback_url,
        };
        let job = match self.store.create(new_job).await {
            Ok(job) => job,
            Err(e) => {
                self.discard_staged(&staged);
                return Err(IntakeError::Store(e));
            }
        };

        info!(job_id = %job.id, file = declared_name, "Upload job queued");
        self.wakeup.notify_one();
        Ok(job)
    }

    /// URL intake: only the URL shape is checked here; the download
    /// happens inside the processor pipeline.
    pub async fn create_url_job(
        &self,
        file_url: &str,
        params: TaskParams,
    ) -> Result<Job, IntakeError> {
        self.validate_params(&params)?;
        validate_http_url(file_url)?;

        let new_job = NewJob {
            engine_name: self.engine_name.clone(),
            task_type: params.task_type,
            priority: params.priority,
            source: MediaSource::RemoteUrl(file_url.to_string()),
            file_url: Some(file_url.to_string()),
            file_name: None,
            file_size_bytes: None,
            file_duration: None,
            platform: None,
            decode_options: params.decode_options,
            callback_url: params.callback_url,
        };
        let job = self.store.create(new_job).await.map_err(IntakeError::Store)?;

        info!(job_id = %job.id, url = file_url, "URL job queued");
        self.wakeup.notify_one();
        Ok(job)
    }

    /// Crawler-mediated intake: the share URL is resolved to a direct
    /// media URL up front; the original URL is kept verbatim for audit.
    pub async fn create_platform_job(
        &self,
        platform: &str,
        share_url: &str,
        params: TaskParams,
    ) -> Result<Job, IntakeError> {
        self.validate_params(&params)?;
        validate_http_url(share_url)?;

        let resolver = self
            .resolvers
            .get(platform)
            .ok_or_else(|| IntakeError::UnknownPlatform(platform.to_string()))?;
        let resolved = resolver.resolve(share_url).await.map_err(|e| {
            warn!(platform, url = share_url, error = %e, "Crawler resolution failed");
            IntakeError::CrawlerFailed(e.to_string())
        })?;

        let new_job = NewJob {
            engine_name: self.engine_name.clone(),
            task_type: params.task_type,
            priority: params.priority,
            source: MediaSource::RemoteUrl(resolved.direct_media_url),
            file_url: Some(share_url.to_string()),
            file_name: None,
            file_size_bytes: None,
            file_duration: None,
            platform: Some(platform.to_string()),
            decode_options: params.decode_options,
            callback_url: params.callback_url,
        };
        let job = self.store.create(new_job).await.map_err(IntakeError::Store)?;

        info!(job_id = %job.id, platform, "Platform job queued");
        self.wakeup.notify_one();
        Ok(job)
    }

    pub fn supported_platforms(&self) -> Vec<&str> {
        self.resolvers.keys().map(String::as_str).collect()
    }

    fn validate_params(&self, params: &TaskParams) -> Result<(), IntakeError> {
        params
            .decode_options
            .validate()
            .map_err(IntakeError::Validation)?;
        if let Some(url) = params.callback_url.as_deref() {
            if !url.is_empty() {
                validate_http_url(url)?;
            }
        }
        Ok(())
    }

    fn discard_staged(&self, path: &std::path::Path) {
        self.staging
            .schedule_delete(path.to_path_buf(), std::time::Duration::ZERO);
    }
}

fn validate_http_url(raw: &str) -> Result<(), IntakeError> {
    let parsed = url::Url::parse(raw)
        .map_err(|_| IntakeError::Validation(format!("malformed url: {}", raw)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(IntakeError::Validation(format!(
            "unsupported url scheme: {}",
            parsed.scheme()
        )));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("{0}")]
    Validation(String),
    #[error("upload exceeds the maximum allowed size")]
    PayloadTooLarge,
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),
    #[error("crawler failed: {0}")]
    CrawlerFailed(String),
    #[error("staging failed: {0}")]
    Staging(StagingError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl IntakeError {
    /// Maps staging failures onto intake semantics; also used by the
    /// HTTP layer when it stages multipart uploads itself.
    pub fn from_staging(e: StagingError) -> Self {
        match e {
            StagingError::TooLarge { .. } => IntakeError::PayloadTooLarge,
            StagingError::ExtensionNotAllowed(ext) => {
                IntakeError::Validation(format!("file extension not allowed: {}", ext))
            }
            other => IntakeError::Staging(other),
        }
    }
}
