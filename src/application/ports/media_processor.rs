use std::path::{Path, PathBuf};

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Mp3 => "audio/mpeg",
        }
    }
}

impl std::str::FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wav" => Ok(AudioFormat::Wav),
            "mp3" => Ok(AudioFormat::Mp3),
            _ => Err(format!("Unsupported audio format: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioExtractSpec {
    pub format: AudioFormat,
    pub sample_rate: Option<u32>,
    pub bit_depth: Option<u32>,
}

/// Media probing and conversion, backed by an external toolchain.
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    async fn probe_duration(&self, path: &Path) -> Result<f64, MediaError>;

    /// Extracts the audio track of a video into a new file next to the
    /// input and returns its path.
    async fn extract_audio(
        &self,
        input: &Path,
        spec: &AudioExtractSpec,
    ) -> Result<PathBuf, MediaError>;
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("probe failed: {0}")]
    ProbeFailed(String),
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("media toolchain unavailable: {0}")]
    ToolchainUnavailable(String),
}
