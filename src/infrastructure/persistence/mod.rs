mod pg_job_store;
mod pg_pool;
mod sqlite_job_store;
mod store_factory;

pub use pg_job_store::PgJobStore;
pub use pg_pool::create_pool;
pub use sqlite_job_store::SqliteJobStore;
pub use store_factory::JobStoreFactory;
