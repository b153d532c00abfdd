use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::application::services::TaskParams;
use crate::domain::{DecodeOptions, JobPriority, TaskType};
use crate::presentation::state::AppState;

use super::error::ApiError;
use super::tasks::TaskCreatedResponse;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformTaskRequest {
    pub url: String,
    #[serde(default)]
    pub task_type: Option<TaskType>,
    #[serde(default)]
    pub priority: Option<JobPriority>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub decode_options: Option<DecodeOptions>,
}

/// Crawler-mediated intake: the share URL is resolved to a direct media
/// URL before the job is queued; crawler failures surface as 502.
pub async fn platform_task_handler(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    Json(body): Json<PlatformTaskRequest>,
) -> Result<Response, ApiError> {
    let params = TaskParams {
        task_type: body.task_type.unwrap_or(TaskType::Transcribe),
        priority: body.priority.unwrap_or_default(),
        decode_options: body.decode_options.unwrap_or_default(),
        callback_url: body.callback_url,
    };
    let job = state
        .intake
        .create_platform_job(&platform, &body.url, params)
        .await?;
    let result_url = format!("/api/v1/tasks/{}", job.id);
    Ok((
        StatusCode::OK,
        Json(TaskCreatedResponse { job, result_url }),
    )
        .into_response())
}
