use std::path::PathBuf;
use std::sync::Arc;

use crate::application::ports::{JobStore, StoreError};
use crate::presentation::config::{DatabaseBackendSetting, DatabaseSettings};

use super::pg_job_store::PgJobStore;
use super::pg_pool::create_pool;
use super::sqlite_job_store::SqliteJobStore;

pub struct JobStoreFactory;

impl JobStoreFactory {
    pub async fn create(settings: &DatabaseSettings) -> Result<Arc<dyn JobStore>, StoreError> {
        match settings.backend {
            DatabaseBackendSetting::Sqlite => {
                let path = PathBuf::from(&settings.url);
                let store = SqliteJobStore::connect(&path).await?;
                Ok(Arc::new(store))
            }
            DatabaseBackendSetting::Postgres => {
                let pool = create_pool(settings).await?;
                let store = PgJobStore::new(pool).await?;
                Ok(Arc::new(store))
            }
        }
    }
}
