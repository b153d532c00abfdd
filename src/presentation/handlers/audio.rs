use std::str::FromStr;

use axum::extract::{Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::application::ports::{AudioExtractSpec, AudioFormat};
use crate::application::services::IntakeError;
use crate::presentation::state::AppState;

use super::error::ApiError;

/// Extract the audio track from an uploaded video and return the bytes
/// in the requested container. Both the staged video and the extracted
/// audio are deleted once the response is built.
pub async fn extract_audio_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut staged: Option<std::path::PathBuf> = None;
    let mut format = AudioFormat::Wav;
    let mut sample_rate: Option<u32> = None;
    let mut bit_depth: Option<u32> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("failed to read multipart: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("video.bin").to_string();
                let mut field = field;
                let stream: futures::stream::BoxStream<'_, Result<bytes::Bytes, std::io::Error>> =
                    Box::pin(async_stream::stream! {
                        loop {
                            match field.chunk().await {
                                Ok(Some(bytes)) => yield Ok(bytes),
                                Ok(None) => break,
                                Err(e) => {
                                    yield Err(std::io::Error::other(e.to_string()));
                                    break;
                                }
                            }
                        }
                    });
                let path = state
                    .staging
                    .stage_upload(stream, &file_name)
                    .await
                    .map_err(|e| ApiError::from(IntakeError::from_staging(e)))?;
                staged = Some(path);
            }
            "format" | "output_format" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                format = AudioFormat::from_str(&text).map_err(ApiError::bad_request)?;
            }
            "sample_rate" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                sample_rate = Some(
                    text.trim()
                        .parse()
                        .map_err(|_| ApiError::bad_request("invalid sample_rate"))?,
                );
            }
            "bit_depth" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                bit_depth = Some(
                    text.trim()
                        .parse()
                        .map_err(|_| ApiError::bad_request("invalid bit_depth"))?,
                );
            }
            other => {
                return Err(ApiError::bad_request(format!("unknown field: {}", other)));
            }
        }
    }

    let video_path = staged.ok_or_else(|| ApiError::bad_request("no video file uploaded"))?;
    let spec = AudioExtractSpec {
        format,
        sample_rate,
        bit_depth,
    };

    let extracted = match state.media.extract_audio(&video_path, &spec).await {
        Ok(path) => path,
        Err(e) => {
            state
                .staging
                .schedule_delete(video_path, std::time::Duration::ZERO);
            return Err(ApiError::internal(format!("audio extraction failed: {}", e)));
        }
    };

    let bytes = tokio::fs::read(&extracted)
        .await
        .map_err(|e| ApiError::internal(format!("failed to read extracted audio: {}", e)))?;

    state
        .staging
        .schedule_delete(video_path, std::time::Duration::ZERO);
    state
        .staging
        .schedule_delete(extracted, std::time::Duration::ZERO);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"extracted_audio.{}\"", format.as_str()),
            ),
        ],
        bytes,
    )
        .into_response())
}
