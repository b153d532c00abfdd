use std::path::PathBuf;
use std::str::FromStr;

use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::services::{IntakeError, TaskParams};
use crate::domain::{
    DecodeOptions, Job, JobId, JobPriority, JobQuery, JobStatus, SubtitleFormat, TaskType,
};
use crate::presentation::state::AppState;

use super::error::{ApiError, ErrorResponse};

#[derive(Serialize)]
pub struct TaskCreatedResponse {
    #[serde(flatten)]
    pub job: Job,
    pub result_url: String,
}

#[derive(Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Job>,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTaskRequest {
    pub file_url: String,
    #[serde(default)]
    pub task_type: Option<TaskType>,
    #[serde(default)]
    pub priority: Option<JobPriority>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub decode_options: Option<DecodeOptions>,
}

/// Create a transcription/translation job from either a multipart
/// upload or a JSON body carrying a `file_url`.
pub async fn create_task_handler(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {}", e)))?;
        create_from_multipart(state, multipart).await
    } else {
        let Json(body) = Json::<CreateTaskRequest>::from_request(request, &state)
            .await
            .map_err(|e| ApiError::bad_request(format!("invalid request body: {}", e)))?;
        let params = TaskParams {
            task_type: body.task_type.unwrap_or(TaskType::Transcribe),
            priority: body.priority.unwrap_or_default(),
            decode_options: body.decode_options.unwrap_or_default(),
            callback_url: body.callback_url,
        };
        let job = state.intake.create_url_job(&body.file_url, params).await?;
        Ok(created_response(job))
    }
}

async fn create_from_multipart(
    state: AppState,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut decode_fields = serde_json::Map::new();
    let mut task_type = TaskType::Transcribe;
    let mut priority = JobPriority::default();
    let mut callback_url: Option<String> = None;
    let mut file_url: Option<String> = None;
    let mut staged: Option<(PathBuf, String)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                discard(&state, staged);
                return Err(ApiError::bad_request(format!(
                    "failed to read multipart: {}",
                    e
                )));
            }
        };
        let name = field.name().unwrap_or_default().to_string();

        if matches!(name.as_str(), "file" | "file_upload") {
            if staged.is_some() {
                discard(&state, staged);
                return Err(ApiError::bad_request("more than one file part"));
            }
            let file_name = field.file_name().unwrap_or("upload.bin").to_string();
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
            staged = Some((path, file_name));
            continue;
        }

        let text = match field.text().await {
            Ok(text) => text,
            Err(e) => {
                discard(&state, staged);
                return Err(ApiError::bad_request(format!("unreadable field {}: {}", name, e)));
            }
        };
        match name.as_str() {
            "task_type" => match TaskType::from_str(&text) {
                Ok(parsed) => task_type = parsed,
                Err(e) => {
                    discard(&state, staged);
                    return Err(ApiError::bad_request(e));
                }
            },
            "priority" => match JobPriority::from_str(&text) {
                Ok(parsed) => priority = parsed,
                Err(e) => {
                    discard(&state, staged);
                    return Err(ApiError::bad_request(e));
                }
            },
            "callback_url" => callback_url = Some(text).filter(|t| !t.is_empty()),
            "file_url" => file_url = Some(text).filter(|t| !t.is_empty()),
            other => match decode_field_value(other, &text) {
                Ok(value) => {
                    decode_fields.insert(other.to_string(), value);
                }
                Err(reason) => {
                    discard(&state, staged);
                    return Err(ApiError::bad_request(reason));
                }
            },
        }
    }

    // Unknown keys surface here through deny_unknown_fields.
    let decode_options: DecodeOptions =
        match serde_json::from_value(Value::Object(decode_fields)) {
            Ok(options) => options,
            Err(e) => {
                discard(&state, staged);
                return Err(ApiError::bad_request(format!("invalid decode options: {}", e)));
            }
        };
    let params = TaskParams {
        task_type,
        priority,
        decode_options,
        callback_url,
    };

    match (staged, file_url) {
        (Some(staged), Some(_)) => {
            discard(&state, Some(staged));
            Err(ApiError::bad_request(
                "provide either a file upload or file_url, not both",
            ))
        }
        (Some((path, file_name)), None) => {
            let job = state
                .intake
                .create_upload_job(path, &file_name, params)
                .await?;
            Ok(created_response(job))
        }
        (None, Some(url)) => {
            let job = state.intake.create_url_job(&url, params).await?;
            Ok(created_response(job))
        }
        (None, None) => Err(ApiError::bad_request(
            "either a file upload or file_url is required",
        )),
    }
}

fn discard(state: &AppState, staged: Option<(PathBuf, String)>) {
    if let Some((path, _)) = staged {
        state.staging.schedule_delete(path, std::time::Duration::ZERO);
    }
}

/// Multipart carries every option as text; convert to the JSON shape
/// the options schema expects. Comma-separated temperatures become a
/// fallback schedule, mirroring the query conventions of typical ASR
/// frontends.
fn decode_field_value(name: &str, text: &str) -> Result<Value, String> {
    let number = |raw: &str| -> Result<Value, String> {
        let parsed: f64 = raw
            .trim()
            .parse()
            .map_err(|_| format!("invalid number for {}: {:?}", name, raw))?;
        serde_json::Number::from_f64(parsed)
            .map(Value::Number)
            .ok_or_else(|| format!("non-finite number for {}", name))
    };
    let boolean = |raw: &str| -> Result<Value, String> {
        match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "no" => Ok(Value::Bool(false)),
            other => Err(format!("invalid boolean for {}: {:?}", name, other)),
        }
    };

    match name {
        "temperature" => {
            if text.contains(',') {
                let values: Result<Vec<Value>, String> = text.split(',').map(number).collect();
                Ok(Value::Array(values?))
            } else {
                number(text)
            }
        }
        "compression_ratio_threshold"
        | "no_speech_threshold"
        | "hallucination_silence_threshold" => number(text),
        "condition_on_previous_text" | "word_timestamps" => boolean(text),
        // Validated as a numeric list later; stored in its text form.
        "clip_timestamps" => Ok(Value::String(text.to_string())),
        _ => Ok(Value::String(text.to_string())),
    }
}

fn created_response(job: Job) -> Response {
    let result_url = format!("/api/v1/tasks/{}", job.id);
    (
        StatusCode::OK,
        Json(TaskCreatedResponse { job, result_url }),
    )
        .into_response()
}

pub async fn get_task_handler(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> Result<Response, ApiError> {
    match state.store.get(JobId::new(task_id)).await? {
        Some(job) => Ok((StatusCode::OK, Json(job)).into_response()),
        None => Err(ApiError::not_found(format!("Task not found: {}", task_id))),
    }
}

pub async fn list_tasks_handler(
    State(state): State<AppState>,
    Query(filter): Query<JobQuery>,
) -> Result<Response, ApiError> {
    let filter = filter.normalized();
    let tasks = state.store.query(&filter).await?;
    Ok((
        StatusCode::OK,
        Json(TaskListResponse {
            tasks,
            limit: filter.limit,
            offset: filter.offset,
        }),
    )
        .into_response())
}

pub async fn delete_task_handler(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> Result<Response, ApiError> {
    if state.store.delete(JobId::new(task_id)).await? {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Err(ApiError::not_found(format!("Task not found: {}", task_id)))
    }
}

#[derive(Deserialize)]
pub struct SubtitleQuery {
    #[serde(default = "default_subtitle_format")]
    pub format: String,
}

fn default_subtitle_format() -> String {
    "srt".to_string()
}

/// Derive subtitle text from a completed job's stored result.
pub async fn subtitle_handler(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
    Query(query): Query<SubtitleQuery>,
) -> Result<Response, ApiError> {
    let format = SubtitleFormat::from_str(&query.format).map_err(ApiError::bad_request)?;

    let job = state
        .store
        .get(JobId::new(task_id))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Task not found: {}", task_id)))?;

    if job.status != JobStatus::Completed {
        return Ok((
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: format!("task {} is not completed (status: {})", task_id, job.status),
            }),
        )
            .into_response());
    }
    let result = job
        .result
        .as_ref()
        .ok_or_else(|| ApiError::internal("completed task has no stored result"))?;

    let body = match format {
        SubtitleFormat::Srt => crate::domain::render_srt(result),
        SubtitleFormat::Vtt => crate::domain::render_vtt(result),
    }
    .map_err(|e| ApiError::new(StatusCode::CONFLICT, e.to_string()))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"task_{}.{}\"", task_id, format.as_str()),
            ),
        ],
        body,
    )
        .into_response())
}
