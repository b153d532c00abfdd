use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::application::ports::{StagingError, StoreError};
use crate::application::services::IntakeError;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Uniform error envelope for every handler.
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "Request failed");
        }
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<IntakeError> for ApiError {
    fn from(e: IntakeError) -> Self {
        let status = match &e {
            IntakeError::Validation(_) => StatusCode::BAD_REQUEST,
            IntakeError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            IntakeError::UnknownPlatform(_) => StatusCode::NOT_FOUND,
            IntakeError::CrawlerFailed(_) => StatusCode::BAD_GATEWAY,
            IntakeError::Staging(inner) => return staging_status(inner),
            IntakeError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = match &e {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::IllegalTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, e.to_string())
    }
}

fn staging_status(e: &StagingError) -> ApiError {
    let status = match e {
        StagingError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        StagingError::ExtensionNotAllowed(_) | StagingError::BadUrl(_) => StatusCode::BAD_REQUEST,
        StagingError::SourceStatus(_)
        | StagingError::DownloadFailed(_)
        | StagingError::ResolveFailed(_) => StatusCode::BAD_GATEWAY,
        StagingError::UnknownPlatform(_) => StatusCode::NOT_FOUND,
        StagingError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    ApiError::new(status, e.to_string())
}

impl From<StagingError> for ApiError {
    fn from(e: StagingError) -> Self {
        staging_status(&e)
    }
}
