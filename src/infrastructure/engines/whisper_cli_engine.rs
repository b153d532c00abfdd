use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::application::ports::{Device, EngineError, EngineInstance, SpeechEngine};
use crate::domain::{DecodeOptions, Segment, TaskType, Temperature, TranscriptionResult};

pub const WHISPER_CLI_ENGINE: &str = "whisper_cli";

/// ASR backend that shells out to a whisper.cpp-style binary. The model
/// is loaded per invocation by the subprocess, so "instances" are cheap
/// bookkeeping records that pin a device assignment.
pub struct WhisperCliEngine {
    binary: PathBuf,
    model: PathBuf,
    gpu_count: u32,
}

impl WhisperCliEngine {
    pub fn new(binary: PathBuf, model: PathBuf, gpu_count: u32) -> Result<Self, EngineError> {
        if !binary.exists() {
            return Err(EngineError::ModelLoadFailed(format!(
                "whisper binary not found: {}",
                binary.display()
            )));
        }
        if !model.exists() {
            return Err(EngineError::ModelLoadFailed(format!(
                "model file not found: {}",
                model.display()
            )));
        }
        Ok(Self {
            binary,
            model,
            gpu_count,
        })
    }
}

#[async_trait]
impl SpeechEngine for WhisperCliEngine {
    fn name(&self) -> &str {
        WHISPER_CLI_ENGINE
    }

    fn gpu_count(&self) -> u32 {
        self.gpu_count
    }

    async fn create_instance(
        &self,
        device: Device,
    ) -> Result<Arc<dyn EngineInstance>, EngineError> {
        Ok(Arc::new(WhisperCliInstance {
            binary: self.binary.clone(),
            model: self.model.clone(),
            device,
        }))
    }
}

struct WhisperCliInstance {
    binary: PathBuf,
    model: PathBuf,
    device: Device,
}

impl WhisperCliInstance {
    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        match self.device {
            Device::Cpu => {
                cmd.arg("--no-gpu");
            }
            Device::Gpu(id) => {
                cmd.env("CUDA_VISIBLE_DEVICES", id.to_string());
            }
        }
        cmd
    }
}

impl EngineInstance for WhisperCliInstance {
    fn infer(
        &self,
        audio_path: &Path,
        task: TaskType,
        options: &DecodeOptions,
    ) -> Result<TranscriptionResult, EngineError> {
        let json_sidecar = audio_path.with_extension("whisper");
        let mut cmd = self.base_command();
        cmd.arg("-m")
            .arg(&self.model)
            .arg("-f")
            .arg(audio_path)
            .arg("--output-json-full")
            .arg("--output-file")
            .arg(&json_sidecar);

        if task == TaskType::Translate {
            cmd.arg("--translate");
        }
        match options.language.as_deref() {
            Some(lang) => {
                cmd.arg("--language").arg(lang);
            }
            None => {
                cmd.arg("--language").arg("auto");
            }
        }
        if let Some(temperature) = &options.temperature {
            let first = match temperature {
                Temperature::Single(t) => *t,
                Temperature::Schedule(ts) => ts.first().copied().unwrap_or(0.0),
            };
            cmd.arg("--temperature").arg(first.to_string());
        }
        if let Some(prompt) = &options.initial_prompt {
            cmd.arg("--prompt").arg(prompt);
        }
        if let Some(threshold) = options.no_speech_threshold {
            cmd.arg("--no-speech-thold").arg(threshold.to_string());
        }
        if options.word_timestamps == Some(true) {
            cmd.arg("--max-len").arg("1");
        }

        let output = cmd
            .output()
            .map_err(|e| EngineError::TransientDevice(format!("spawn failed: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr));
        }

        let sidecar_path = json_sidecar.with_extension("whisper.json");
        let raw = std::fs::read_to_string(&sidecar_path)
            .map_err(|e| EngineError::DecodeFailed(format!("missing output json: {}", e)))?;
        let _ = std::fs::remove_file(&sidecar_path);

        let parsed: WhisperCliOutput = serde_json::from_str(&raw)
            .map_err(|e| EngineError::DecodeFailed(format!("unparseable output json: {}", e)))?;
        Ok(parsed.into_result())
    }

    fn health_check(&self) -> Result<(), EngineError> {
        if !self.binary.exists() {
            return Err(EngineError::ModelLoadFailed(format!(
                "whisper binary vanished: {}",
                self.binary.display()
            )));
        }
        if !self.model.exists() {
            return Err(EngineError::ModelLoadFailed(format!(
                "model file vanished: {}",
                self.model.display()
            )));
        }
        Ok(())
    }
}

/// CUDA allocator and driver failures may leave device memory corrupted;
/// those are worth one retry on a fresh worker. Everything else is a
/// decoder problem that will recur.
fn classify_failure(stderr: &str) -> EngineError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("cuda") || lowered.contains("out of memory") || lowered.contains("device") {
        EngineError::TransientDevice(truncate(stderr, 500))
    } else {
        EngineError::DecodeFailed(truncate(stderr, 500))
    }
}

fn truncate(s: &str, max: usize) -> String {
    let trimmed = s.trim();
    if trimmed.len() <= max {
        trimmed.to_string()
    } else {
        let mut end = max;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}

#[derive(Deserialize)]
struct WhisperCliOutput {
    #[serde(default)]
    result: WhisperCliResultInfo,
    #[serde(default)]
    transcription: Vec<WhisperCliSegment>,
}

#[derive(Deserialize, Default)]
struct WhisperCliResultInfo {
    language: Option<String>,
}

#[derive(Deserialize)]
struct WhisperCliSegment {
    offsets: WhisperCliOffsets,
    text: String,
}

#[derive(Deserialize)]
struct WhisperCliOffsets {
    from: i64,
    to: i64,
}

impl WhisperCliOutput {
    fn into_result(self) -> TranscriptionResult {
        let segments: Vec<Segment> = self
            .transcription
            .iter()
            .enumerate()
            .map(|(index, seg)| Segment {
                id: index as i64,
                start: seg.offsets.from as f64 / 1000.0,
                end: seg.offsets.to as f64 / 1000.0,
                text: seg.text.trim().to_string(),
                diagnostics: serde_json::Map::new(),
            })
            .collect();
        let text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let mut info = serde_json::Map::new();
        if let Some(language) = self.result.language {
            info.insert("language".into(), serde_json::Value::String(language));
        }
        TranscriptionResult {
            text,
            segments,
            info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_output_maps_to_segments_in_seconds() {
        let raw = r#"{
            "result": {"language": "en"},
            "transcription": [
                {"offsets": {"from": 0, "to": 2480}, "text": " hello"},
                {"offsets": {"from": 2480, "to": 5000}, "text": " world"}
            ]
        }"#;
        let parsed: WhisperCliOutput = serde_json::from_str(raw).unwrap();
        let result = parsed.into_result();
        assert_eq!(result.text, "hello world");
        assert_eq!(result.segments.len(), 2);
        assert!((result.segments[0].end - 2.48).abs() < 1e-9);
        assert_eq!(result.detected_language(), Some("en"));
    }

    #[test]
    fn cuda_failures_classify_as_transient() {
        assert!(classify_failure("CUDA error: out of memory").is_transient());
        assert!(!classify_failure("invalid sample rate").is_transient());
    }
}
