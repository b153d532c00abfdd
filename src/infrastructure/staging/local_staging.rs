use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::ports::{Staging, StagingError, UploadPolicy};

/// Per-platform HTTP access tweaks for CDN downloads that demand them.
#[derive(Debug, Clone, Default)]
pub struct PlatformHttp {
    pub proxy: Option<String>,
    pub cookie: Option<String>,
    pub referer: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StagingConfig {
    pub dir: PathBuf,
    pub max_file_size: u64,
    pub allowed_extensions: Vec<String>,
    pub max_concurrent_downloads: usize,
    pub download_retries: u32,
    pub retry_base_delay: Duration,
    /// Files older than this with no owning job are reaped at startup.
    pub reconcile_grace: Duration,
    pub platform_http: HashMap<String, PlatformHttp>,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./staging"),
            max_file_size: 2 * 1024 * 1024 * 1024,
            allowed_extensions: Vec::new(),
            max_concurrent_downloads: 4,
            download_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            reconcile_grace: Duration::from_secs(3600),
            platform_http: HashMap::new(),
        }
    }
}

/// Stages media bytes under a single local directory. Filenames carry a
/// UUID token so concurrent stages never collide.
pub struct LocalStagingArea {
    config: StagingConfig,
    policy: UploadPolicy,
    downloads: Semaphore,
    default_client: reqwest::Client,
    platform_clients: HashMap<String, (reqwest::Client, PlatformHttp)>,
}

impl LocalStagingArea {
    pub fn new(config: StagingConfig) -> Result<Self, StagingError> {
        std::fs::create_dir_all(&config.dir)?;

        let default_client = reqwest::Client::builder()
            .user_agent(concat!("narvik/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| StagingError::DownloadFailed(e.to_string()))?;

        let mut platform_clients = HashMap::new();
        for (platform, http) in &config.platform_http {
            let mut builder = reqwest::Client::builder()
                .user_agent(concat!("narvik/", env!("CARGO_PKG_VERSION")))
                .connect_timeout(Duration::from_secs(10));
            if let Some(proxy) = &http.proxy {
                let proxy = reqwest::Proxy::all(proxy)
                    .map_err(|e| StagingError::DownloadFailed(format!("bad proxy: {}", e)))?;
                builder = builder.proxy(proxy);
            }
            let client = builder
                .build()
                .map_err(|e| StagingError::DownloadFailed(e.to_string()))?;
            platform_clients.insert(platform.clone(), (client, http.clone()));
        }

        let policy = UploadPolicy {
            allowed_extensions: config.allowed_extensions.clone(),
        };
        let downloads = Semaphore::new(config.max_concurrent_downloads.max(1));
        Ok(Self {
            config,
            policy,
            downloads,
            default_client,
            platform_clients,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    fn unique_path(&self, declared_name: &str) -> PathBuf {
        let safe = sanitize_file_name(declared_name);
        self.config
            .dir
            .join(format!("{}_{}", Uuid::new_v4().simple(), safe))
    }

    /// Writes the stream to `path`, failing once `max_file_size` is
    /// exceeded. The partial file is removed on any error.
    async fn write_capped(
        &self,
        path: &Path,
        mut stream: BoxStream<'_, Result<Bytes, io::Error>>,
    ) -> Result<u64, StagingError> {
        let mut file = tokio::fs::File::create(path).await?;
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(path).await;
                    return Err(StagingError::Io(e));
                }
            };
            written += bytes.len() as u64;
            if written > self.config.max_file_size {
                drop(file);
                let _ = tokio::fs::remove_file(path).await;
                return Err(StagingError::TooLarge {
                    max_bytes: self.config.max_file_size,
                });
            }
            if let Err(e) = file.write_all(&bytes).await {
                drop(file);
                let _ = tokio::fs::remove_file(path).await;
                return Err(StagingError::Io(e));
            }
        }
        file.flush().await?;
        Ok(written)
    }

    async fn download_once(
        &self,
        url: &str,
        platform: Option<&str>,
    ) -> Result<PathBuf, StagingError> {
        let (client, extras) = match platform.and_then(|p| self.platform_clients.get(p)) {
            Some((client, http)) => (client, Some(http)),
            None => (&self.default_client, None),
        };

        let mut request = client.get(url);
        if let Some(http) = extras {
            if let Some(cookie) = &http.cookie {
                request = request.header(reqwest::header::COOKIE, cookie);
            }
            if let Some(referer) = &http.referer {
                request = request.header(reqwest::header::REFERER, referer);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| StagingError::DownloadFailed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(StagingError::SourceStatus(status.as_u16()));
        }
        if let Some(length) = response.content_length() {
            if length > self.config.max_file_size {
                return Err(StagingError::TooLarge {
                    max_bytes: self.config.max_file_size,
                });
            }
        }

        let name = file_name_from_url(url);
        let path = self.unique_path(&name);
        let stream: BoxStream<'_, Result<Bytes, io::Error>> = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(io::Error::other)),
        );
        let written = self.write_capped(&path, stream).await?;
        debug!(url, bytes = written, path = %path.display(), "Download staged");
        Ok(path)
    }
}

#[async_trait]
impl Staging for LocalStagingArea {
    async fn stage_upload(
        &self,
        stream: BoxStream<'_, Result<Bytes, io::Error>>,
        declared_name: &str,
    ) -> Result<PathBuf, StagingError> {
        if !self.policy.permits(declared_name) {
            let ext = declared_name.rsplit('.').next().unwrap_or_default();
            return Err(StagingError::ExtensionNotAllowed(ext.to_string()));
        }
        let path = self.unique_path(declared_name);
        let written = self.write_capped(&path, stream).await?;
        debug!(file = declared_name, bytes = written, "Upload staged");
        Ok(path)
    }

    async fn stage_url(&self, url: &str, platform: Option<&str>) -> Result<PathBuf, StagingError> {
        url::Url::parse(url).map_err(|_| StagingError::BadUrl(url.to_string()))?;

        let _permit = self
            .downloads
            .acquire()
            .await
            .map_err(|_| StagingError::DownloadFailed("staging shut down".into()))?;

        let mut delay = self.config.retry_base_delay;
        let mut last_error = None;
        for attempt in 0..=self.config.download_retries {
            match self.download_once(url, platform).await {
                Ok(path) => return Ok(path),
                // Size violations and client errors will not improve with
                // retries.
                Err(e @ StagingError::TooLarge { .. }) => return Err(e),
                Err(StagingError::SourceStatus(code)) if (400..500).contains(&code) => {
                    return Err(StagingError::SourceStatus(code));
                }
                Err(e) => {
                    warn!(url, attempt, error = %e, "Download attempt failed");
                    last_error = Some(e);
                    if attempt < self.config.download_retries {
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(Duration::from_secs(30));
                    }
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| StagingError::DownloadFailed("download retries exhausted".into())))
    }

    fn schedule_delete(&self, path: PathBuf, after: Duration) {
        tokio::spawn(async move {
            if !after.is_zero() {
                tokio::time::sleep(after).await;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "Staged file deleted"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete staged file"),
            }
        });
    }

    async fn reconcile(&self, active_paths: &[String]) -> Result<u64, StagingError> {
        let active: HashSet<&str> = active_paths.iter().map(String::as_str).collect();
        let mut removed = 0u64;
        let mut entries = tokio::fs::read_dir(&self.config.dir).await?;
        let now = SystemTime::now();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let meta = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            if active.contains(path.to_string_lossy().as_ref()) {
                continue;
            }
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age < self.config.reconcile_grace {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    removed += 1;
                    debug!(path = %path.display(), "Reaped orphan staged file");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to reap staged file"),
            }
        }
        if removed > 0 {
            info!(removed, "Staging directory reconciled");
        }
        Ok(removed)
    }
}

fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

fn file_name_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| "download".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("a b/c:d.mp4"), "c_d.mp4");
        assert_eq!(sanitize_file_name(""), "upload");
    }

    #[test]
    fn url_basename_is_extracted() {
        assert_eq!(
            file_name_from_url("https://cdn.example.com/v/clip.mp4?sig=abc"),
            "clip.mp4"
        );
        assert_eq!(file_name_from_url("https://example.com"), "download");
    }
}
