use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{info, warn};

use crate::application::ports::JobStore;
use crate::domain::{Job, JobId};

#[derive(Debug, Clone)]
pub struct CallbackConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: u32,
    pub max_delay: Duration,
    pub request_timeout: Duration,
    /// Simultaneous outbound deliveries across all hosts.
    pub max_in_flight: usize,
    /// Simultaneous deliveries against a single host.
    pub per_host_limit: usize,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2,
            max_delay: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
            max_in_flight: 8,
            per_host_limit: 2,
        }
    }
}

/// Status code recorded when no HTTP response was ever observed.
pub const TRANSPORT_FAILURE_CODE: i32 = -1;

/// At-least-once outbound notifier for terminal jobs. Retries transport
/// failures and 5xx with exponential backoff, stops on 4xx, and records
/// the final outcome on the job row either way.
pub struct CallbackDispatcher {
    store: Arc<dyn JobStore>,
    client: reqwest::Client,
    config: CallbackConfig,
    in_flight: Arc<Semaphore>,
    host_limits: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl CallbackDispatcher {
    pub fn new(store: Arc<dyn JobStore>, config: CallbackConfig) -> Arc<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("narvik/", env!("CARGO_PKG_VERSION"), " (callback)"))
            .build()
            .expect("callback http client");
        Arc::new(Self {
            store,
            client,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight)),
            host_limits: Mutex::new(HashMap::new()),
            config,
        })
    }

    /// Re-derives deliveries that were pending at the last shutdown,
    /// then consumes the queue until it closes.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<JobId>) {
        match self.store.pending_callbacks().await {
            Ok(pending) if !pending.is_empty() => {
                info!(count = pending.len(), "Recovered pending callbacks");
                for job in pending {
                    Self::spawn_delivery(Arc::clone(&self), job.id);
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to recover pending callbacks"),
        }

        while let Some(job_id) = rx.recv().await {
            Self::spawn_delivery(Arc::clone(&self), job_id);
        }
        info!("Callback dispatcher stopped: channel closed");
    }

    fn spawn_delivery(dispatcher: Arc<Self>, job_id: JobId) {
        tokio::spawn(async move {
            let Ok(permit) = dispatcher.in_flight.clone().acquire_owned().await else {
                return;
            };
            dispatcher.deliver(job_id).await;
            drop(permit);
        });
    }

    async fn deliver(&self, job_id: JobId) {
        let job = match self.store.get(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %job_id, "Callback target job vanished");
                return;
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to load job for callback");
                return;
            }
        };
        let Some(url) = job.callback_url.clone().filter(|u| !u.is_empty()) else {
            return;
        };
        // A recorded 2xx is final; recovery scans may re-enqueue rows
        // that already succeeded mid-scan.
        if matches!(job.callback_status_code, Some(code) if (200..300).contains(&code)) {
            return;
        }

        let _host_permit = self.host_permit(&url).await;
        let (code, message) = self.post_with_retry(&job, &url).await;

        if let Err(e) = self
            .store
            .record_callback(job_id, code, &message, Utc::now())
            .await
        {
            warn!(job_id = %job_id, error = %e, "Failed to record callback outcome");
        }
    }

    async fn host_permit(&self, url: &str) -> Option<tokio::sync::OwnedSemaphorePermit> {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))?;
        let semaphore = {
            let mut limits = self.host_limits.lock().await;
            Arc::clone(
                limits
                    .entry(host)
                    .or_insert_with(|| Arc::new(Semaphore::new(self.config.per_host_limit))),
            )
        };
        semaphore.acquire_owned().await.ok()
    }

    /// Returns the final `(status_code, message)` to record.
    async fn post_with_retry(&self, job: &Job, url: &str) -> (i32, String) {
        let mut last: (i32, String) = (TRANSPORT_FAILURE_CODE, "not attempted".into());
        for attempt in 1..=self.config.max_attempts {
            match self.client.post(url).json(job).send().await {
                Ok(response) => {
                    let status = response.status();
                    let code = status.as_u16() as i32;
                    if status.is_success() {
                        info!(job_id = %job.id, attempt, status = code, "Callback delivered");
                        return (code, "delivered".into());
                    }
                    if status.is_client_error() {
                        warn!(job_id = %job.id, attempt, status = code, "Callback rejected by receiver");
                        return (code, format!("rejected with status {}", code));
                    }
                    warn!(job_id = %job.id, attempt, status = code, "Callback attempt failed");
                    last = (code, format!("failed with status {}", code));
                }
                Err(e) => {
                    warn!(job_id = %job.id, attempt, error = %e, "Callback transport error");
                    last = (TRANSPORT_FAILURE_CODE, format!("transport error: {}", e));
                }
            }
            if attempt < self.config.max_attempts {
                tokio::time::sleep(self.retry_delay(attempt)).await;
            }
        }
        last
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = self
            .config
            .backoff_factor
            .saturating_pow(attempt.saturating_sub(1));
        (self.config.base_delay * factor).min(self.config.max_delay)
    }
}
