use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

/// Runtime environment the service believes it is deployed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Local,
    Test,
    Prod,
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" | "development" => Ok(Self::Local),
            "test" => Ok(Self::Test),
            "prod" | "production" => Ok(Self::Prod),
            other => Err(format!(
                "Invalid environment: {}. Expected: local, test, or prod",
                other
            )),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Local => "local",
            Environment::Test => "test",
            Environment::Prod => "prod",
        };
        f.write_str(name)
    }
}

/// Aggregate service configuration, resolved from environment variables
/// with defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct Settings {
    pub environment: Environment,
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub staging: StagingSettings,
    pub engine: EngineSettings,
    pub pool: PoolSettings,
    pub processor: ProcessorSettings,
    pub callback: CallbackSettings,
    pub crawler: CrawlerSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackendSetting {
    Sqlite,
    Postgres,
}

impl FromStr for DatabaseBackendSetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!("Invalid database backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub backend: DatabaseBackendSetting,
    /// File path for sqlite, connection URL for postgres.
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct StagingSettings {
    pub dir: String,
    pub max_file_size: u64,
    /// Empty list admits every extension.
    pub allowed_extensions: Vec<String>,
    pub max_concurrent_downloads: usize,
    pub download_retries: u32,
    pub reconcile_grace_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub name: String,
    pub binary_path: Option<String>,
    pub model_path: Option<String>,
    pub gpu_count: u32,
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub min_size: usize,
    pub max_size: usize,
    pub max_instances_per_gpu: usize,
    pub init_with_max_pool_size: bool,
}

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub max_concurrent_tasks: usize,
    pub status_check_interval_seconds: u64,
    pub job_deadline_seconds: Option<u64>,
    pub recovery_threshold_seconds: i64,
    pub shutdown_grace_seconds: u64,
    pub staged_file_ttl_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct CallbackSettings {
    pub max_attempts: u32,
    pub base_delay_seconds: u64,
    pub backoff_factor: u32,
    pub max_delay_seconds: u64,
    pub request_timeout_seconds: u64,
    pub max_in_flight: usize,
    pub per_host_limit: usize,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CrawlerSettings {
    pub douyin_proxy: Option<String>,
    pub douyin_cookie: Option<String>,
    pub tiktok_proxy: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid configuration for {key}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub reason: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = optional("APP_ENV")
            .map(Environment::try_from)
            .transpose()
            .map_err(|reason| ConfigError {
                key: "APP_ENV",
                reason,
            })?
            .unwrap_or(Environment::Local);

        Ok(Self {
            environment,
            server: ServerSettings {
                host: optional("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
                port: parsed("SERVER_PORT", 8080)?,
            },
            database: DatabaseSettings {
                backend: parsed_from_str("DATABASE_BACKEND", DatabaseBackendSetting::Sqlite)?,
                url: optional("DATABASE_URL").unwrap_or_else(|| "./narvik.db".into()),
                max_connections: parsed("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            staging: StagingSettings {
                dir: optional("STAGING_DIR").unwrap_or_else(|| "./staging".into()),
                max_file_size: parsed("MAX_FILE_SIZE", 2 * 1024 * 1024 * 1024)?,
                allowed_extensions: optional("ALLOWED_EXTENSIONS")
                    .map(|raw| {
                        raw.split(',')
                            .map(|s| s.trim().trim_start_matches('.').to_lowercase())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
                max_concurrent_downloads: parsed("MAX_CONCURRENT_DOWNLOADS", 4)?,
                download_retries: parsed("DOWNLOAD_RETRIES", 3)?,
                reconcile_grace_seconds: parsed("STAGING_RECONCILE_GRACE_SECONDS", 3600)?,
            },
            engine: EngineSettings {
                name: optional("ENGINE_NAME").unwrap_or_else(|| "whisper_cli".into()),
                binary_path: optional("ENGINE_BINARY_PATH"),
                model_path: optional("ENGINE_MODEL_PATH"),
                gpu_count: parsed("ENGINE_GPU_COUNT", 0)?,
            },
            pool: PoolSettings {
                min_size: parsed("POOL_MIN_SIZE", 1)?,
                max_size: parsed("POOL_MAX_SIZE", 3)?,
                max_instances_per_gpu: parsed("MAX_INSTANCES_PER_GPU", 1)?,
                init_with_max_pool_size: parsed("INIT_WITH_MAX_POOL_SIZE", true)?,
            },
            processor: ProcessorSettings {
                max_concurrent_tasks: parsed("MAX_CONCURRENT_TASKS", 3)?,
                status_check_interval_seconds: parsed("TASK_STATUS_CHECK_INTERVAL", 3)?,
                job_deadline_seconds: optional_parsed("JOB_DEADLINE_SECONDS")?,
                recovery_threshold_seconds: parsed("RECOVERY_THRESHOLD_SECONDS", 600)?,
                shutdown_grace_seconds: parsed("SHUTDOWN_GRACE_SECONDS", 30)?,
                staged_file_ttl_seconds: parsed("STAGED_FILE_TTL_SECONDS", 5)?,
            },
            callback: CallbackSettings {
                max_attempts: parsed("CALLBACK_MAX_ATTEMPTS", 5)?,
                base_delay_seconds: parsed("CALLBACK_BASE_DELAY_SECONDS", 1)?,
                backoff_factor: parsed("CALLBACK_BACKOFF_FACTOR", 2)?,
                max_delay_seconds: parsed("CALLBACK_MAX_DELAY_SECONDS", 60)?,
                request_timeout_seconds: parsed("CALLBACK_REQUEST_TIMEOUT_SECONDS", 10)?,
                max_in_flight: parsed("CALLBACK_MAX_IN_FLIGHT", 8)?,
                per_host_limit: parsed("CALLBACK_PER_HOST_LIMIT", 2)?,
                queue_capacity: parsed("CALLBACK_QUEUE_CAPACITY", 1024)?,
            },
            crawler: CrawlerSettings {
                douyin_proxy: optional("DOUYIN_PROXY"),
                douyin_cookie: optional("DOUYIN_COOKIE"),
                tiktok_proxy: optional("TIKTOK_PROXY"),
            },
        })
    }
}

fn optional(key: &'static str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parsed<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match optional(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError {
            key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn optional_parsed<T>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    optional(key)
        .map(|raw| {
            raw.parse().map_err(|e: T::Err| ConfigError {
                key,
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn parsed_from_str<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr<Err = String>,
{
    match optional(key) {
        Some(raw) => raw.parse().map_err(|reason| ConfigError { key, reason }),
        None => Ok(default),
    }
}
