use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{DecodeOptions, TaskType, TranscriptionResult};

/// Compute device a worker instance is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Gpu(u32),
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Gpu(id) => write!(f, "cuda:{}", id),
        }
    }
}

/// An ASR backend variant. Creating an instance is expensive (model load
/// onto a device); inference on an instance is synchronous and
/// CPU/GPU-bound.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Number of GPU devices this engine can see. Zero means CPU-only.
    fn gpu_count(&self) -> u32;

    async fn create_instance(&self, device: Device) -> Result<Arc<dyn EngineInstance>, EngineError>;
}

/// A loaded model bound to a device. Not thread-safe for concurrent
/// inference; the pool hands each instance to at most one pipeline at a
/// time.
pub trait EngineInstance: Send + Sync {
    /// Blocking. Callers must run this on the blocking thread pool, never
    /// on the event loop.
    fn infer(
        &self,
        audio_path: &Path,
        task: TaskType,
        options: &DecodeOptions,
    ) -> Result<TranscriptionResult, EngineError>;

    /// Blocking trivial probe used before handing the instance out.
    fn health_check(&self) -> Result<(), EngineError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("model loading failed: {0}")]
    ModelLoadFailed(String),
    /// Device-level failure that may have corrupted instance state; the
    /// holder should discard the worker and retry once on a fresh one.
    #[error("transient device error: {0}")]
    TransientDevice(String),
    #[error("decoding failed: {0}")]
    DecodeFailed(String),
    #[error("unsupported engine: {0}")]
    UnsupportedEngine(String),
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::TransientDevice(_))
    }
}
