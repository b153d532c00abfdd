use async_trait::async_trait;

/// Crawler outcome: a direct media URL plus whatever display metadata the
/// platform exposes.
#[derive(Debug, Clone)]
pub struct ResolvedMedia {
    pub direct_media_url: String,
    pub display_metadata: Option<serde_json::Value>,
}

/// URL-to-direct-media-URL resolver for one short-form video platform.
/// New platforms plug in by implementing this and registering under
/// their name; intake and staging are indifferent to the specifics.
#[async_trait]
pub trait PlatformResolver: Send + Sync {
    fn platform(&self) -> &str;

    async fn resolve(&self, url: &str) -> Result<ResolvedMedia, ResolveError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("unsupported share url: {0}")]
    UnsupportedUrl(String),
    #[error("crawler request failed: {0}")]
    RequestFailed(String),
    #[error("platform response missing media url: {0}")]
    MissingMedia(String),
}
