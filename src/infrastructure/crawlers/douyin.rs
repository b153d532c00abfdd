use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::application::ports::{PlatformResolver, ResolveError, ResolvedMedia};

const DETAIL_ENDPOINT: &str = "https://www.douyin.com/aweme/v1/web/aweme/detail/";

fn aweme_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"/(?:video|note|discover)/(\d+)").expect("valid regex")
    })
}

/// Resolves Douyin share URLs (including v.douyin.com short links) to
/// direct media URLs. The web detail API requires a session cookie.
pub struct DouyinResolver {
    client: reqwest::Client,
    cookie: Option<String>,
}

impl DouyinResolver {
    pub fn new(proxy: Option<&str>, cookie: Option<String>) -> Result<Self, ResolveError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
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
        Ok(Self { client, cookie })
    }

    async fn expand_and_extract_id(&self, url: &str) -> Result<String, ResolveError> {
        if let Some(id) = aweme_id_pattern().captures(url).map(|c| c[1].to_string()) {
            return Ok(id);
        }
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResolveError::RequestFailed(e.to_string()))?;
        let final_url = response.url().to_string();
        aweme_id_pattern()
            .captures(&final_url)
            .map(|c| c[1].to_string())
            .ok_or_else(|| ResolveError::UnsupportedUrl(url.to_string()))
    }
}

#[async_trait]
impl PlatformResolver for DouyinResolver {
    fn platform(&self) -> &str {
        "douyin"
    }

    async fn resolve(&self, url: &str) -> Result<ResolvedMedia, ResolveError> {
        let aweme_id = self.expand_and_extract_id(url).await?;

        let mut request = self
            .client
            .get(DETAIL_ENDPOINT)
            .query(&[("aweme_id", aweme_id.as_str()), ("aid", "6383")]);
        if let Some(cookie) = &self.cookie {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let detail: serde_json::Value = request
            .send()
            .await
            .map_err(|e| ResolveError::RequestFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| ResolveError::RequestFailed(e.to_string()))?;

        let aweme = detail
            .get("aweme_detail")
            .filter(|v| !v.is_null())
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
