use std::path::PathBuf;
use std::sync::Arc;

use crate::application::ports::{EngineError, SpeechEngine};
use crate::presentation::config::EngineSettings;

use super::mock_engine::{MockSpeechEngine, MOCK_ENGINE};
use super::whisper_cli_engine::{WhisperCliEngine, WHISPER_CLI_ENGINE};

pub struct SpeechEngineFactory;

impl SpeechEngineFactory {
    pub fn create(settings: &EngineSettings) -> Result<Arc<dyn SpeechEngine>, EngineError> {
        match settings.name.as_str() {
            WHISPER_CLI_ENGINE => {
                let binary = settings.binary_path.as_deref().ok_or_else(|| {
                    EngineError::ModelLoadFailed("ENGINE_BINARY_PATH required".into())
                })?;
                let model = settings.model_path.as_deref().ok_or_else(|| {
                    EngineError::ModelLoadFailed("ENGINE_MODEL_PATH required".into())
                })?;
                let engine = WhisperCliEngine::new(
                    PathBuf::from(binary),
                    PathBuf::from(model),
                    settings.gpu_count,
                )?;
                Ok(Arc::new(engine))
            }
            MOCK_ENGINE => Ok(Arc::new(MockSpeechEngine::new(settings.gpu_count))),
            other => Err(EngineError::UnsupportedEngine(other.to_string())),
        }
    }
}
