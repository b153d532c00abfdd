mod callback_dispatcher;
mod intake;
mod model_pool;
mod task_processor;

pub use callback_dispatcher::{CallbackConfig, CallbackDispatcher, TRANSPORT_FAILURE_CODE};
pub use intake::{IntakeError, IntakeService, TaskParams};
pub use model_pool::{ModelPool, PoolConfig, PoolError, PoolStatus, Worker, WorkerLease};
pub use task_processor::{ProcessorConfig, TaskProcessor};
