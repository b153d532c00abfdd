use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::application::ports::{Device, EngineError, EngineInstance, SpeechEngine};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub max_instances_per_gpu: usize,
    /// Eagerly allocate up to `max_size` workers at startup instead of
    /// only `min_size`.
    pub init_with_max_pool_size: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 3,
            max_instances_per_gpu: 1,
            init_with_max_pool_size: true,
        }
    }
}

/// An ASR model instance bound to a device, owned by the pool and loaned
/// to at most one pipeline at a time.
pub struct Worker {
    pub id: u64,
    pub device: Device,
    pub engine_name: String,
    pub created_at: DateTime<Utc>,
    instance: Arc<dyn EngineInstance>,
}

impl Worker {
    pub fn instance(&self) -> Arc<dyn EngineInstance> {
        Arc::clone(&self.instance)
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("device", &self.device)
            .field("engine_name", &self.engine_name)
            .finish()
    }
}

struct PoolState {
    idle: VecDeque<Worker>,
    total: usize,
    max_size: usize,
    per_device: HashMap<Device, usize>,
    next_device: u32,
    next_worker_id: u64,
}

/// Snapshot for health reporting.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStatus {
    pub engine_name: String,
    pub total: usize,
    pub idle: usize,
    pub busy: usize,
    pub max_size: usize,
}

/// Bounded set of expensive ASR workers with fair FIFO checkout.
///
/// The semaphore carries one permit per idle worker, so waiters queue in
/// arrival order and the mutex is only ever held for bookkeeping. The
/// inference call itself always runs outside the pool's critical section.
pub struct ModelPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    engine: Arc<dyn SpeechEngine>,
    min_size: usize,
    max_instances_per_gpu: usize,
    init_with_max_pool_size: bool,
    state: Mutex<PoolState>,
    permits: Semaphore,
}

impl ModelPool {
    pub fn new(engine: Arc<dyn SpeechEngine>, config: PoolConfig) -> Result<Arc<Self>, PoolError> {
        if config.min_size > config.max_size {
            return Err(PoolError::InvalidConfig(
                "min_size cannot be greater than max_size".into(),
            ));
        }
        let capacity = device_capacity(engine.gpu_count(), config.max_instances_per_gpu);
        let max_size = config.max_size.min(capacity);
        Ok(Arc::new(Self {
            inner: Arc::new(PoolInner {
                engine,
                min_size: config.min_size.min(max_size),
                max_instances_per_gpu: config.max_instances_per_gpu,
                init_with_max_pool_size: config.init_with_max_pool_size,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    total: 0,
                    max_size,
                    per_device: HashMap::new(),
                    next_device: 0,
                    next_worker_id: 0,
                }),
                permits: Semaphore::new(0),
            }),
        }))
    }

    pub fn engine_name(&self) -> &str {
        self.inner.engine.name()
    }

    /// Eagerly loads workers. Creation is sequential so the device
    /// allocator sees a deterministic sequence.
    pub async fn initialize(&self) -> Result<(), PoolError> {
        let target = {
            let state = self.inner.state.lock().expect("pool lock poisoned");
            if self.inner.init_with_max_pool_size {
                state.max_size
            } else {
                self.inner.min_size.min(state.max_size)
            }
        };
        info!(
            engine = self.inner.engine.name(),
            instances = target,
            "Initializing model pool"
        );
        for _ in 0..target {
            self.inner.spawn_worker().await?;
        }
        Ok(())
    }

    /// Blocks until a worker becomes idle; waiters are served in FIFO
    /// order. The worker is health-checked before being handed out; a
    /// bad worker is destroyed and replaced before the caller resumes.
    pub async fn checkout(&self) -> Result<WorkerLease, PoolError> {
        loop {
            let permit = self
                .inner
                .permits
                .acquire()
                .await
                .map_err(|_| PoolError::Closed)?;
            permit.forget();

            let worker = {
                let mut state = self.inner.state.lock().expect("pool lock poisoned");
                state
                    .idle
                    .pop_front()
                    .expect("semaphore permit issued without an idle worker")
            };

            let instance = worker.instance();
            let healthy = match tokio::task::spawn_blocking(move || instance.health_check()).await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.inner.retire(worker);
                    return Err(PoolError::InstanceCreation(format!(
                        "health probe panicked: {}",
                        e
                    )));
                }
            };

            match healthy {
                Ok(()) => {
                    return Ok(WorkerLease {
                        pool: Arc::clone(&self.inner),
                        worker: Some(worker),
                    });
                }
                Err(e) => {
                    warn!(
                        worker_id = worker.id,
                        device = %worker.device,
                        error = %e,
                        "Worker failed health check, replacing"
                    );
                    self.inner.retire(worker);
                    // Replace before resuming so the caller does not spin
                    // on a shrinking pool.
                    self.inner.spawn_worker().await?;
                }
            }
        }
    }

    /// Grows or shrinks the pool. Shrinking waits for busy workers to
    /// check in before destroying them and is rejected below `min_size`.
    pub async fn resize(&self, new_max: usize) -> Result<(), PoolError> {
        if new_max < self.inner.min_size {
            return Err(PoolError::InvalidConfig(format!(
                "cannot shrink below min_size ({})",
                self.inner.min_size
            )));
        }
        let capacity = device_capacity(
            self.inner.engine.gpu_count(),
            self.inner.max_instances_per_gpu,
        );
        let target = new_max.min(capacity);

        let current = {
            let mut state = self.inner.state.lock().expect("pool lock poisoned");
            state.max_size = target;
            state.total
        };
        info!(from = current, to = target, "Resizing model pool");

        if target > current {
            for _ in current..target {
                self.inner.spawn_worker().await?;
            }
            return Ok(());
        }

        for _ in target..current {
            let permit = self
                .inner
                .permits
                .acquire()
                .await
                .map_err(|_| PoolError::Closed)?;
            permit.forget();
            let worker = {
                let mut state = self.inner.state.lock().expect("pool lock poisoned");
                state
                    .idle
                    .pop_front()
                    .expect("semaphore permit issued without an idle worker")
            };
            self.inner.retire(worker);
        }
        Ok(())
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock().expect("pool lock poisoned");
        PoolStatus {
            engine_name: self.inner.engine.name().to_string(),
            total: state.total,
            idle: state.idle.len(),
            busy: state.total - state.idle.len(),
            max_size: state.max_size,
        }
    }

    /// Stops issuing workers and drops the idle set. Leased workers are
    /// destroyed as their leases resolve.
    pub fn shutdown(&self) {
        self.inner.permits.close();
        let mut state = self.inner.state.lock().expect("pool lock poisoned");
        let drained = state.idle.len();
        state.total = state.total.saturating_sub(drained);
        let retired: Vec<Device> = state.idle.drain(..).map(|w| w.device).collect();
        for device in retired {
            if let Some(count) = state.per_device.get_mut(&device) {
                *count = count.saturating_sub(1);
            }
        }
        info!(drained, "Model pool shut down");
    }
}

/// A CPU cannot usefully parallelize inference, so without GPUs the
/// pool is capped at a single instance.
fn device_capacity(gpu_count: u32, max_instances_per_gpu: usize) -> usize {
    if gpu_count == 0 {
        1
    } else {
        gpu_count as usize * max_instances_per_gpu.max(1)
    }
}

impl PoolInner {
    /// Marks the worker idle and wakes at most one waiter.
    fn checkin(&self, worker: Worker) {
        let mut state = self.state.lock().expect("pool lock poisoned");
        state.idle.push_back(worker);
        drop(state);
        self.permits.add_permits(1);
    }

    /// Removes a worker from the pool's accounting and drops it.
    fn retire(&self, worker: Worker) {
        let mut state = self.state.lock().expect("pool lock poisoned");
        state.total = state.total.saturating_sub(1);
        if let Some(count) = state.per_device.get_mut(&worker.device) {
            *count = count.saturating_sub(1);
        }
    }

    async fn retire_and_replace(&self, worker: Worker) -> Result<(), PoolError> {
        self.retire(worker);
        let below_min = {
            let state = self.state.lock().expect("pool lock poisoned");
            state.total < self.min_size
        };
        if below_min {
            self.spawn_worker().await?;
        }
        Ok(())
    }

    /// Creates one worker and makes it available. The device slot is
    /// reserved up front so concurrent creations cannot oversubscribe a
    /// GPU.
    async fn spawn_worker(&self) -> Result<(), PoolError> {
        let device = {
            let mut state = self.state.lock().expect("pool lock poisoned");
            if state.total >= state.max_size {
                return Err(PoolError::AtCapacity);
            }
            let device = self.pick_device(&mut state)?;
            *state.per_device.entry(device).or_insert(0) += 1;
            state.total += 1;
            device
        };

        match self.engine.create_instance(device).await {
            Ok(instance) => {
                let worker = {
                    let mut state = self.state.lock().expect("pool lock poisoned");
                    state.next_worker_id += 1;
                    Worker {
                        id: state.next_worker_id,
                        device,
                        engine_name: self.engine.name().to_string(),
                        created_at: Utc::now(),
                        instance,
                    }
                };
                info!(
                    worker_id = worker.id,
                    device = %device,
                    engine = self.engine.name(),
                    "Model instance created"
                );
                self.checkin(worker);
                Ok(())
            }
            Err(e) => {
                let mut state = self.state.lock().expect("pool lock poisoned");
                state.total = state.total.saturating_sub(1);
                if let Some(count) = state.per_device.get_mut(&device) {
                    *count = count.saturating_sub(1);
                }
                Err(PoolError::Engine(e))
            }
        }
    }

    /// Round-robin across GPU ids while respecting the per-GPU cap;
    /// without GPUs every worker lands on the CPU.
    fn pick_device(&self, state: &mut PoolState) -> Result<Device, PoolError> {
        let gpu_count = self.engine.gpu_count();
        if gpu_count == 0 {
            return Ok(Device::Cpu);
        }
        for offset in 0..gpu_count {
            let id = (state.next_device + offset) % gpu_count;
            let device = Device::Gpu(id);
            let used = state.per_device.get(&device).copied().unwrap_or(0);
            if used < self.max_instances_per_gpu.max(1) {
                state.next_device = (id + 1) % gpu_count;
                return Ok(device);
            }
        }
        Err(PoolError::AtCapacity)
    }
}

/// Scoped loan of a worker. Dropping the lease checks the worker back
/// in on every exit path; `discard` destroys it instead (and replaces it
/// when the pool would fall below its minimum size).
pub struct WorkerLease {
    pool: Arc<PoolInner>,
    worker: Option<Worker>,
}

impl std::fmt::Debug for WorkerLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLease")
            .field("worker", &self.worker)
            .finish()
    }
}

impl WorkerLease {
    pub fn worker(&self) -> &Worker {
        self.worker.as_ref().expect("lease accessed after discard")
    }

    pub async fn discard(mut self) -> Result<(), PoolError> {
        let worker = self.worker.take().expect("lease already resolved");
        warn!(worker_id = worker.id, device = %worker.device, "Discarding worker");
        self.pool.retire_and_replace(worker).await
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            if self.pool.permits.is_closed() {
                self.pool.retire(worker);
            } else {
                self.pool.checkin(worker);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
    #[error("pool is at device capacity")]
    AtCapacity,
    #[error("pool is shut down")]
    Closed,
    #[error("instance creation failed: {0}")]
    InstanceCreation(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}
