use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, instrument, warn};

use crate::application::ports::StoreError;
use crate::presentation::config::DatabaseSettings;

const CONNECT_ATTEMPTS: u32 = 6;

/// Connects with exponential backoff so the service survives a database
/// that comes up slower than it does.
#[instrument(skip(settings))]
pub async fn create_pool(settings: &DatabaseSettings) -> Result<PgPool, StoreError> {
    let mut delay = Duration::from_millis(250);

    for attempt in 1..=CONNECT_ATTEMPTS {
        match PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&settings.url)
            .await
        {
            Ok(pool) => {
                info!(attempt, "PostgreSQL connection pool established");
                return Ok(pool);
            }
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                warn!(
                    error = %e,
                    attempt,
                    next_delay_ms = delay.as_millis(),
                    "PostgreSQL connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(StoreError::ConnectionFailed(e.to_string())),
        }
    }
    unreachable!("connect loop always returns")
}
