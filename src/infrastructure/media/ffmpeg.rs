use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;
use ffmpeg_sidecar::command::FfmpegCommand;
use uuid::Uuid;

use crate::application::ports::{AudioExtractSpec, AudioFormat, MediaError, MediaProcessor};

pub fn check_ffmpeg_binary() -> Result<(), MediaError> {
    let mut child = FfmpegCommand::new().arg("-version").spawn().map_err(|e| {
        MediaError::ToolchainUnavailable(format!("ffmpeg binary not found in $PATH: {}", e))
    })?;

    let status = child
        .wait()
        .map_err(|e| MediaError::ToolchainUnavailable(format!("ffmpeg version check: {}", e)))?;

    if status.success() {
        Ok(())
    } else {
        Err(MediaError::ToolchainUnavailable(
            "ffmpeg binary returned non-zero exit code during version check".to_string(),
        ))
    }
}

/// ffmpeg/ffprobe-backed probing and extraction. Both operations spawn
/// subprocesses and run on the blocking thread pool.
pub struct FfmpegMediaProcessor;

impl FfmpegMediaProcessor {
    fn probe_duration_blocking(path: &Path) -> Result<f64, MediaError> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .map_err(|e| MediaError::ToolchainUnavailable(format!("ffprobe spawn: {}", e)))?;

        if !output.status.success() {
            return Err(MediaError::ProbeFailed(format!(
                "ffprobe failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        raw.trim()
            .parse::<f64>()
            .map_err(|_| MediaError::ProbeFailed(format!("unparseable duration: {:?}", raw.trim())))
    }

    fn extract_audio_blocking(
        input: &Path,
        spec: &AudioExtractSpec,
    ) -> Result<PathBuf, MediaError> {
        let parent = input.parent().unwrap_or_else(|| Path::new("."));
        let output_path = parent.join(format!(
            "{}.{}",
            Uuid::new_v4().simple(),
            spec.format.as_str()
        ));

        let mut cmd = FfmpegCommand::new();
        cmd.args(["-y", "-i"])
            .arg(input.to_str().unwrap_or_default())
            .arg("-vn");
        if let Some(rate) = spec.sample_rate {
            cmd.args(["-ar", &rate.to_string()]);
        }
        match spec.format {
            AudioFormat::Wav => {
                let codec = match spec.bit_depth {
                    Some(24) => "pcm_s24le",
                    Some(32) => "pcm_s32le",
                    _ => "pcm_s16le",
                };
                cmd.args(["-acodec", codec]);
            }
            AudioFormat::Mp3 => {
                cmd.args(["-acodec", "libmp3lame"]);
            }
        }
        cmd.arg(output_path.to_str().unwrap_or_default());

        let mut child = cmd
            .spawn()
            .map_err(|e| MediaError::ToolchainUnavailable(format!("ffmpeg spawn: {}", e)))?;
        let status = child
            .wait()
            .map_err(|e| MediaError::ExtractionFailed(format!("ffmpeg wait: {}", e)))?;

        if !status.success() {
            let _ = std::fs::remove_file(&output_path);
            return Err(MediaError::ExtractionFailed(format!(
                "ffmpeg exited with non-zero status extracting from {}",
                input.display()
            )));
        }
        Ok(output_path)
    }
}

#[async_trait]
impl MediaProcessor for FfmpegMediaProcessor {
    async fn probe_duration(&self, path: &Path) -> Result<f64, MediaError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::probe_duration_blocking(&path))
            .await
            .map_err(|e| MediaError::ProbeFailed(format!("probe task: {}", e)))?
    }

    async fn extract_audio(
        &self,
        input: &Path,
        spec: &AudioExtractSpec,
    ) -> Result<PathBuf, MediaError> {
        let input = input.to_path_buf();
        let spec = spec.clone();
        tokio::task::spawn_blocking(move || Self::extract_audio_blocking(&input, &spec))
            .await
            .map_err(|e| MediaError::ExtractionFailed(format!("extract task: {}", e)))?
    }
}
