use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::instrument;

use crate::application::ports::{JobStore, StoreError};
use crate::domain::{
    DecodeOptions, Job, JobId, JobPatch, JobPriority, JobQuery, JobStatus, MediaSource, NewJob,
    TaskType, TranscriptionResult,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    status TEXT NOT NULL DEFAULT 'queued',
    priority TEXT NOT NULL DEFAULT 'normal',
    engine_name TEXT NOT NULL,
    task_type TEXT NOT NULL,
    source_kind TEXT NOT NULL,
    source_ref TEXT NOT NULL,
    file_url TEXT,
    file_name TEXT,
    file_size_bytes INTEGER,
    file_duration REAL,
    platform TEXT,
    language TEXT,
    decode_options TEXT NOT NULL DEFAULT '{}',
    result TEXT,
    error_message TEXT,
    task_processing_time REAL,
    callback_url TEXT,
    callback_status_code INTEGER,
    callback_message TEXT,
    callback_time TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_claim
    ON jobs (status, engine_name, priority, created_at, id);

-- Reserved for workflow orchestration; not exercised by the core.
CREATE TABLE IF NOT EXISTS workflows (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT,
    definition TEXT,
    created_at TEXT
);
"#;

const JOB_COLUMNS: &str = "id, status, priority, engine_name, task_type, source_kind, source_ref, \
     file_url, file_name, file_size_bytes, file_duration, platform, language, decode_options, \
     result, error_message, task_processing_time, callback_url, callback_status_code, \
     callback_message, callback_time, created_at, updated_at";

/// Embedded single-file backend, convenient for development and tests.
///
/// SQLite has no `FOR UPDATE SKIP LOCKED`, so claims are serialized with
/// an in-process lock. That makes this backend unsafe for multiple
/// processes sharing one database file: run exactly one service process
/// against it, or use the Postgres backend.
pub struct SqliteJobStore {
    pool: SqlitePool,
    claim_lock: Mutex<()>,
}

impl SqliteJobStore {
    pub async fn connect(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        Ok(Self {
            pool,
            claim_lock: Mutex::new(()),
        })
    }

    async fn fetch_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        row.map(|r| job_from_row(&r)).transpose()
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    #[instrument(skip(self, new_job), fields(engine = %new_job.engine_name))]
    async fn create(&self, new_job: NewJob) -> Result<Job, StoreError> {
        let now = Utc::now();
        let decode_options = serde_json::to_string(&new_job.decode_options)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let sql = format!(
            "INSERT INTO jobs (status, priority, engine_name, task_type, source_kind, source_ref, \
             file_url, file_name, file_size_bytes, file_duration, platform, decode_options, \
             callback_url, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {}",
            JOB_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(JobStatus::Queued.as_str())
            .bind(new_job.priority.as_str())
            .bind(&new_job.engine_name)
            .bind(new_job.task_type.as_str())
            .bind(new_job.source.kind())
            .bind(new_job.source.reference())
            .bind(&new_job.file_url)
            .bind(&new_job.file_name)
            .bind(new_job.file_size_bytes)
            .bind(new_job.file_duration)
            .bind(&new_job.platform)
            .bind(decode_options)
            .bind(&new_job.callback_url)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        job_from_row(&row)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.fetch_job(id).await
    }

    async fn query(&self, filter: &JobQuery) -> Result<Vec<Job>, StoreError> {
        let mut builder = sqlx::QueryBuilder::new(format!(
            "SELECT {} FROM jobs WHERE 1 = 1",
            JOB_COLUMNS
        ));
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(priority) = filter.priority {
            builder.push(" AND priority = ").push_bind(priority.as_str());
        }
        if let Some(engine) = &filter.engine_name {
            builder.push(" AND engine_name = ").push_bind(engine.clone());
        }
        if let Some(language) = &filter.language {
            builder.push(" AND language = ").push_bind(language.clone());
        }
        if let Some(after) = filter.created_after {
            builder.push(" AND created_at >= ").push_bind(after);
        }
        if let Some(before) = filter.created_before {
            builder.push(" AND created_at <= ").push_bind(before);
        }
        builder
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(filter.limit as i64)
            .push(" OFFSET ")
            .push_bind(filter.offset as i64);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        rows.iter().map(job_from_row).collect()
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, patch), fields(job_id = %id))]
    async fn update(&self, id: JobId, patch: JobPatch) -> Result<Job, StoreError> {
        let current = self.fetch_job(id).await?.ok_or(StoreError::NotFound(id))?;
        let next_status = match patch.status {
            Some(next) if next != current.status => {
                if !current.status.can_transition_to(next) {
                    return Err(StoreError::IllegalTransition {
                        id,
                        from: current.status.to_string(),
                        to: next.to_string(),
                    });
                }
                next
            }
            _ => current.status,
        };

        let sql = format!(
            "UPDATE jobs SET status = ?, file_name = COALESCE(?, file_name), \
             file_size_bytes = COALESCE(?, file_size_bytes), \
             file_duration = COALESCE(?, file_duration), \
             language = COALESCE(?, language), updated_at = ? \
             WHERE id = ? AND status = ? \
             RETURNING {}",
            JOB_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(next_status.as_str())
            .bind(&patch.file_name)
            .bind(patch.file_size_bytes)
            .bind(patch.file_duration)
            .bind(&patch.language)
            .bind(Utc::now())
            .bind(id.as_i64())
            .bind(current.status.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        match row {
            Some(r) => job_from_row(&r),
            // The row moved under us between read and write.
            None => Err(StoreError::IllegalTransition {
                id,
                from: current.status.to_string(),
                to: next_status.to_string(),
            }),
        }
    }

    #[instrument(skip(self))]
    async fn claim_next(&self, engine_name: &str) -> Result<Option<Job>, StoreError> {
        // The whole select-then-update must appear atomic; SQLite offers
        // no row-level claim primitive, so serialize in-process.
        let _guard = self.claim_lock.lock().await;

        let sql = format!(
            "SELECT {} FROM jobs WHERE status = 'queued' AND engine_name = ? \
             ORDER BY CASE priority WHEN 'high' THEN 0 WHEN 'normal' THEN 1 ELSE 2 END, \
             created_at ASC, id ASC LIMIT 1",
            JOB_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(engine_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let job = job_from_row(&row)?;

        let updated = sqlx::query(
            "UPDATE jobs SET status = 'processing', updated_at = ? \
             WHERE id = ? AND status = 'queued'",
        )
        .bind(Utc::now())
        .bind(job.id.as_i64())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.fetch_job(job.id).await
    }

    #[instrument(skip(self, result), fields(job_id = %id))]
    async fn mark_completed(
        &self,
        id: JobId,
        result: &TranscriptionResult,
        language: Option<&str>,
        processing_time: f64,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(result)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let updated = sqlx::query(
            "UPDATE jobs SET status = 'completed', result = ?, \
             language = COALESCE(?, language), task_processing_time = ?, \
             error_message = NULL, updated_at = ? \
             WHERE id = ? AND status = 'processing'",
        )
        .bind(payload)
        .bind(language)
        .bind(processing_time)
        .bind(Utc::now())
        .bind(id.as_i64())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        self.terminal_write_outcome(id, updated.rows_affected(), "completed")
            .await
    }

    #[instrument(skip(self, error_message), fields(job_id = %id))]
    async fn mark_failed(
        &self,
        id: JobId,
        error_message: &str,
        processing_time: Option<f64>,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE jobs SET status = 'failed', error_message = ?, result = NULL, \
             task_processing_time = COALESCE(?, task_processing_time), updated_at = ? \
             WHERE id = ? AND status IN ('processing', 'queued')",
        )
        .bind(error_message)
        .bind(processing_time)
        .bind(Utc::now())
        .bind(id.as_i64())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        self.terminal_write_outcome(id, updated.rows_affected(), "failed")
            .await
    }

    async fn record_callback(
        &self,
        id: JobId,
        status_code: i32,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        // A recorded 2xx outcome is write-once.
        let updated = sqlx::query(
            "UPDATE jobs SET callback_status_code = ?, callback_message = ?, \
             callback_time = ?, updated_at = ? \
             WHERE id = ? AND callback_url IS NOT NULL AND callback_url != '' \
             AND (callback_status_code IS NULL \
                  OR callback_status_code < 200 OR callback_status_code >= 300)",
        )
        .bind(status_code)
        .bind(message)
        .bind(at)
        .bind(Utc::now())
        .bind(id.as_i64())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        if updated.rows_affected() == 0 && self.fetch_job(id).await?.is_none() {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn requeue_orphans(&self, older_than: chrono::Duration) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - older_than;
        let updated = sqlx::query(
            "UPDATE jobs SET status = 'queued', updated_at = ? \
             WHERE status = 'processing' AND updated_at < ?",
        )
        .bind(Utc::now())
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        Ok(updated.rows_affected())
    }

    async fn pending_callbacks(&self) -> Result<Vec<Job>, StoreError> {
        let sql = format!(
            "SELECT {} FROM jobs WHERE status IN ('completed', 'failed') \
             AND callback_url IS NOT NULL AND callback_url != '' \
             AND callback_status_code IS NULL \
             ORDER BY updated_at ASC LIMIT 500",
            JOB_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        rows.iter().map(job_from_row).collect()
    }

    async fn active_local_paths(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT source_ref FROM jobs WHERE source_kind = 'local_path' \
             AND status IN ('queued', 'processing')",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        rows.iter()
            .map(|r| {
                r.try_get::<String, _>("source_ref")
                    .map_err(|e| StoreError::QueryFailed(e.to_string()))
            })
            .collect()
    }
}

impl SqliteJobStore {
    async fn terminal_write_outcome(
        &self,
        id: JobId,
        rows_affected: u64,
        target: &str,
    ) -> Result<(), StoreError> {
        if rows_affected > 0 {
            return Ok(());
        }
        match self.fetch_job(id).await? {
            None => Err(StoreError::NotFound(id)),
            Some(job) => Err(StoreError::IllegalTransition {
                id,
                from: job.status.to_string(),
                to: target.to_string(),
            }),
        }
    }
}

fn job_from_row(row: &SqliteRow) -> Result<Job, StoreError> {
    let id = JobId::new(get(row, "id")?);
    let status: String = get(row, "status")?;
    let priority: String = get(row, "priority")?;
    let task_type: String = get(row, "task_type")?;
    let source_kind: String = get(row, "source_kind")?;
    let source_ref: String = get(row, "source_ref")?;
    let decode_options: String = get(row, "decode_options")?;
    let result: Option<String> = get(row, "result")?;

    Ok(Job {
        id,
        status: JobStatus::from_str(&status).map_err(|e| StoreError::CorruptRow(id, e))?,
        priority: JobPriority::from_str(&priority).map_err(|e| StoreError::CorruptRow(id, e))?,
        engine_name: get(row, "engine_name")?,
        task_type: TaskType::from_str(&task_type).map_err(|e| StoreError::CorruptRow(id, e))?,
        source: MediaSource::from_parts(&source_kind, source_ref)
            .map_err(|e| StoreError::CorruptRow(id, e))?,
        file_url: get(row, "file_url")?,
        file_name: get(row, "file_name")?,
        file_size_bytes: get(row, "file_size_bytes")?,
        file_duration: get(row, "file_duration")?,
        platform: get(row, "platform")?,
        language: get(row, "language")?,
        decode_options: serde_json::from_str::<DecodeOptions>(&decode_options)
            .map_err(|e| StoreError::CorruptRow(id, e.to_string()))?,
        result: result
            .map(|raw| serde_json::from_str::<TranscriptionResult>(&raw))
            .transpose()
            .map_err(|e| StoreError::CorruptRow(id, e.to_string()))?,
        error_message: get(row, "error_message")?,
        task_processing_time: get(row, "task_processing_time")?,
        callback_url: get(row, "callback_url")?,
        callback_status_code: get(row, "callback_status_code")?,
        callback_message: get(row, "callback_message")?,
        callback_time: get(row, "callback_time")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column)
        .map_err(|e| StoreError::QueryFailed(format!("column {}: {}", column, e)))
}
