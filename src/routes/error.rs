use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::models::api::ErrorResponse;
use crate::models::job::JobStatus;
use crate::services::jobs::{DownloadError, SubmitError};

/// Errors surfaced to HTTP clients as `{ "error": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Unauthorized: Invalid or missing token")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    NotCompleted { message: String, status: JobStatus },

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, status) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, None),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, None),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, None),
            ApiError::NotCompleted { status, .. } => (StatusCode::BAD_REQUEST, Some(*status)),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            status,
        };
        (code, Json(body)).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Validation(e) => ApiError::BadRequest(e.to_string()),
            other => {
                tracing::error!(error = %other, "Job submission failed");
                ApiError::Internal("Failed to queue job".to_string())
            }
        }
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::NotFound | DownloadError::OutputMissing => {
                ApiError::NotFound(err.to_string())
            }
            DownloadError::NotCompleted(status) => ApiError::NotCompleted {
                message: err.to_string(),
                status,
            },
            other => {
                tracing::error!(error = %other, "Download failed");
                ApiError::Internal("Failed to prepare download".to_string())
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::BadRequest(format!("Invalid multipart body: {err}"))
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        tracing::error!(error = %err, "Upload storage failed");
        ApiError::Internal("Failed to store upload".to_string())
    }
}
