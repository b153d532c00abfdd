mod job_store;
mod media_processor;
mod platform_resolver;
mod speech_engine;
mod staging;

pub use job_store::{JobStore, StoreError};
pub use media_processor::{AudioExtractSpec, AudioFormat, MediaError, MediaProcessor};
pub use platform_resolver::{PlatformResolver, ResolveError, ResolvedMedia};
pub use speech_engine::{Device, EngineError, EngineInstance, SpeechEngine};
pub use staging::{Staging, StagingError, UploadPolicy};
