use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// Extension allow-list applied to uploads. An empty list admits
/// everything.
#[derive(Debug, Clone, Default)]
pub struct UploadPolicy {
    pub allowed_extensions: Vec<String>,
}

impl UploadPolicy {
    pub fn permits(&self, file_name: &str) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }
        let ext = file_name.rsplit('.').next().unwrap_or_default();
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext))
    }
}

/// Bounded-size acquisition of media bytes into a local staging path,
/// plus the cleanup half of that bargain.
#[async_trait]
pub trait Staging: Send + Sync {
    /// Streams upload bytes to a uniquely-named file. Fails once the
    /// stream exceeds the configured size cap; the partial file is
    /// removed.
    async fn stage_upload(
        &self,
        stream: BoxStream<'_, Result<Bytes, io::Error>>,
        declared_name: &str,
    ) -> Result<PathBuf, StagingError>;

    /// Chunked HTTP download into the staging directory, honoring the
    /// same size cap. Never buffers the full body.
    async fn stage_url(&self, url: &str, platform: Option<&str>) -> Result<PathBuf, StagingError>;

    /// Registers a path for deletion after the given delay.
    fn schedule_delete(&self, path: PathBuf, after: std::time::Duration);

    /// Startup reconciliation: deletes staged files older than the grace
    /// period that no active job references.
    async fn reconcile(&self, active_paths: &[String]) -> Result<u64, StagingError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("file exceeds the maximum allowed size of {max_bytes} bytes")]
    TooLarge { max_bytes: u64 },
    #[error("file extension not allowed: {0}")]
    ExtensionNotAllowed(String),
    #[error("malformed url: {0}")]
    BadUrl(String),
    #[error("download failed: {0}")]
    DownloadFailed(String),
    #[error("source responded with status {0}")]
    SourceStatus(u16),
    #[error("platform resolution failed: {0}")]
    ResolveFailed(String),
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
