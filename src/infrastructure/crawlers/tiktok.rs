use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::application::ports::{PlatformResolver, ResolveError, ResolvedMedia};

const DETAIL_ENDPOINT: &str = "https://api22-normal-c-useast2a.tiktokv.com/aweme/v1/feed/";

fn video_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"/(?:video|photo)/(\d+)").expect("valid regex"))
}

/// Resolves TikTok share URLs to direct media URLs via the feed detail
/// API. Short links are expanded by following redirects first.
pub struct TikTokResolver {
    client: reqwest::Client,
}

impl TikTokResolver {
    pub fn new(proxy: Option<&str>) -> Result<Self, ResolveError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(
                "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) \
                 AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148",
            )
            .timeout(Duration::from_secs(15));
        if let Some(proxy) = proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy)
                    .map_err(|e| ResolveError::RequestFailed(format!("bad proxy: {}", e)))?,
            );
        }
        let client = builder
            .build()
            .map_err(|e| ResolveError::RequestFailed(e.to_string()))?;
        Ok(Self { client })
    }

    async fn expand_and_extract_id(&self, url: &str) -> Result<String, ResolveError> {
        if let Some(id) = video_id_pattern().captures(url).map(|c| c[1].to_string()) {
            return Ok(id);
        }
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResolveError::RequestFailed(e.to_string()))?;
        let final_url = response.url().to_string();
        video_id_pattern()
            .captures(&final_url)
            .map(|c| c[1].to_string())
            .ok_or_else(|| ResolveError::UnsupportedUrl(url.to_string()))
    }
}

#[async_trait]
impl PlatformResolver for TikTokResolver {
    fn platform(&self) -> &str {
        "tiktok"
    }

    async fn resolve(&self, url: &str) -> Result<ResolvedMedia, ResolveError> {
        let aweme_id = self.expand_and_extract_id(url).await?;

        let detail: serde_json::Value = self
            .client
            .get(DETAIL_ENDPOINT)
            .query(&[("aweme_id", aweme_id.as_str())])
            .send()
            .await
            .map_err(|e| ResolveError::RequestFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| ResolveError::RequestFailed(e.to_string()))?;

        let aweme = detail
            .pointer("/aweme_list/0")
            .ok_or_else(|| ResolveError::MissingMedia(format!("aweme {} not found", aweme_id)))?;
        // The CDN lists several mirrors; the last entry is the one to use.
        let play_url = aweme
            .pointer("/video/play_addr/url_list")
            .and_then(|v| v.as_array())
            .and_then(|urls| urls.last())
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ResolveError::MissingMedia(format!("no play address for aweme {}", aweme_id))
            })?;

        Ok(ResolvedMedia {
            direct_media_url: play_url.to_string(),
            display_metadata: aweme.get("desc").cloned(),
        })
    }
}
