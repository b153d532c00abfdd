mod douyin;
mod tiktok;

use std::sync::Arc;

pub use douyin::DouyinResolver;
pub use tiktok::TikTokResolver;

use crate::application::ports::{PlatformResolver, ResolveError};
use crate::presentation::config::CrawlerSettings;

/// Builds one resolver per supported platform from configuration.
pub fn build_resolvers(
    settings: &CrawlerSettings,
) -> Result<Vec<Arc<dyn PlatformResolver>>, ResolveError> {
    let douyin = DouyinResolver::new(
        settings.douyin_proxy.as_deref(),
        settings.douyin_cookie.clone(),
    )?;
    let tiktok = TikTokResolver::new(settings.tiktok_proxy.as_deref())?;
    Ok(vec![Arc::new(douyin), Arc::new(tiktok)])
}
