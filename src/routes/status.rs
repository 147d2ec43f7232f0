use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::JobRecord;
use crate::routes::error::ApiError;

/// Job ids are UUIDs; anything else cannot name a job.
fn parse_job_id(raw: &str) -> Result<String, ApiError> {
    Uuid::parse_str(raw)
        .map(|id| id.to_string())
        .map_err(|_| ApiError::NotFound("Job not found".to_string()))
}

/// GET /status/{id}: current record of a job.
pub async fn get_status(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    let id = parse_job_id(&raw_id)?;

    match state.jobs.status(&id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(ApiError::NotFound("Job not found".to_string())),
        Err(e) => {
            tracing::error!(job_id = %id, error = %e, "Failed to read job status");
            Err(ApiError::Internal("Failed to read job status".to_string()))
        }
    }
}

/// GET /download/{id}: stream a completed job's output.
///
/// Cleanup of the job's artifacts is scheduled before the first byte is sent.
pub async fn download(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_job_id(&raw_id)?;
    let download = state.jobs.prepare_download(&id).await?;

    tracing::info!(job_id = %id, "Streaming output");
    metrics::counter!("media_downloads_total").increment(1);

    let body = Body::from_stream(ReaderStream::new(download.file));
    let disposition = format!("attachment; filename=\"{}\"", download.file_name);

    Ok((
        [
            (CONTENT_TYPE, "video/mp4".to_string()),
            (CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}
