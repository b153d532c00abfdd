use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::application::ports::{Device, EngineError, EngineInstance, SpeechEngine};
use crate::domain::{DecodeOptions, Segment, TaskType, TranscriptionResult};

pub const MOCK_ENGINE: &str = "mock";

/// Next-inference behavior, consumed in order across all instances; an
/// empty script means every inference succeeds.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Succeed,
    TransientDeviceError,
    DecodeError(String),
}

/// Deterministic engine for tests and scaffold mode. Tracks observed
/// concurrency so tests can prove no instance is ever double-issued.
pub struct MockSpeechEngine {
    gpu_count: u32,
    latency: Duration,
    script: Arc<Mutex<VecDeque<MockOutcome>>>,
    failing_health_checks: Arc<AtomicU32>,
    instances_created: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockSpeechEngine {
    pub fn new(gpu_count: u32) -> Self {
        Self {
            gpu_count,
            latency: Duration::ZERO,
            script: Arc::new(Mutex::new(VecDeque::new())),
            failing_health_checks: Arc::new(AtomicU32::new(0)),
            instances_created: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push_outcome(&self, outcome: MockOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    /// The next `count` health checks will report the instance as bad.
    pub fn fail_health_checks(&self, count: u32) {
        self.failing_health_checks.store(count, Ordering::SeqCst);
    }

    pub fn instances_created(&self) -> usize {
        self.instances_created.load(Ordering::SeqCst)
    }

    pub fn max_observed_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechEngine for MockSpeechEngine {
    fn name(&self) -> &str {
        MOCK_ENGINE
    }

    fn gpu_count(&self) -> u32 {
        self.gpu_count
    }

    async fn create_instance(
        &self,
        device: Device,
    ) -> Result<Arc<dyn EngineInstance>, EngineError> {
        self.instances_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockInstance {
            device,
            latency: self.latency,
            script: Arc::clone(&self.script),
            failing_health_checks: Arc::clone(&self.failing_health_checks),
            in_flight: Arc::clone(&self.in_flight),
            max_in_flight: Arc::clone(&self.max_in_flight),
        }))
    }
}

struct MockInstance {
    device: Device,
    latency: Duration,
    script: Arc<Mutex<VecDeque<MockOutcome>>>,
    failing_health_checks: Arc<AtomicU32>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl EngineInstance for MockInstance {
    fn infer(
        &self,
        audio_path: &Path,
        task: TaskType,
        options: &DecodeOptions,
    ) -> Result<TranscriptionResult, EngineError> {
        let concurrent = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(concurrent, Ordering::SeqCst);

        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MockOutcome::Succeed);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            MockOutcome::Succeed => Ok(mock_result(audio_path, task, options)),
            MockOutcome::TransientDeviceError => Err(EngineError::TransientDevice(format!(
                "simulated device fault on {}",
                self.device
            ))),
            MockOutcome::DecodeError(message) => Err(EngineError::DecodeFailed(message)),
        }
    }

    fn health_check(&self) -> Result<(), EngineError> {
        let remaining = self.failing_health_checks.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_health_checks.fetch_sub(1, Ordering::SeqCst);
            return Err(EngineError::TransientDevice("simulated bad instance".into()));
        }
        Ok(())
    }
}

fn mock_result(audio_path: &Path, task: TaskType, options: &DecodeOptions) -> TranscriptionResult {
    let stem = audio_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".into());
    let text = match task {
        TaskType::Transcribe => format!("transcript of {}", stem),
        TaskType::Translate => format!("translation of {}", stem),
    };
    let language = options.language.clone().unwrap_or_else(|| "en".into());
    let mut info = serde_json::Map::new();
    info.insert("language".into(), serde_json::Value::String(language));
    TranscriptionResult {
        segments: vec![Segment {
            id: 0,
            start: 0.0,
            end: 2.0,
            text: text.clone(),
            diagnostics: serde_json::Map::new(),
        }],
        text,
        info,
    }
}
