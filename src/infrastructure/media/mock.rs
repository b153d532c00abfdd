use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::application::ports::{AudioExtractSpec, MediaError, MediaProcessor};

/// Fixed-duration processor for tests and scaffold mode; extraction
/// copies the input byte-for-byte.
pub struct MockMediaProcessor {
    pub duration: f64,
}

impl MockMediaProcessor {
    pub fn new(duration: f64) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl MediaProcessor for MockMediaProcessor {
    async fn probe_duration(&self, _path: &Path) -> Result<f64, MediaError> {
        Ok(self.duration)
    }

    async fn extract_audio(
        &self,
        input: &Path,
        spec: &AudioExtractSpec,
    ) -> Result<PathBuf, MediaError> {
        let output = input.with_extension(spec.format.as_str());
        tokio::fs::copy(input, &output)
            .await
            .map_err(|e| MediaError::ExtractionFailed(e.to_string()))?;
        Ok(output)
    }
}
