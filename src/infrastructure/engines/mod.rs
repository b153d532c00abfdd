mod engine_factory;
mod mock_engine;
mod whisper_cli_engine;

pub use engine_factory::SpeechEngineFactory;
pub use mock_engine::{MockOutcome, MockSpeechEngine, MOCK_ENGINE};
pub use whisper_cli_engine::{WhisperCliEngine, WHISPER_CLI_ENGINE};
