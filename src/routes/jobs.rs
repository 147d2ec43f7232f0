use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::app_state::AppState;
use crate::models::api::SubmitResponse;
use crate::routes::error::ApiError;
use crate::services::jobs::JobService;

/// POST /process: upload a media file with a `-filter:v` command fragment.
pub async fn submit_process(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let id = JobService::new_job_id();
    let input_path = state.jobs.layout().transcode_input(&id);
    let uploads = [input_path.as_path()];

    let mut has_file = false;
    let mut command: Option<String> = None;

    while let Some(field) = next_field(&mut multipart, &uploads).await? {
        match field.name() {
            Some("file") => {
                save_field(field, &input_path, &uploads).await?;
                has_file = true;
                tracing::debug!(job_id = %id, "Input saved");
            }
            Some("command") => match field.text().await {
                Ok(text) => command = Some(text),
                Err(err) => {
                    discard(&uploads).await;
                    return Err(err.into());
                }
            },
            _ => {}
        }
    }

    if !has_file {
        return Err(ApiError::BadRequest("No file uploaded".to_string()));
    }

    let Some(command) = command.filter(|c| !c.is_empty()) else {
        discard(&uploads).await;
        return Err(ApiError::BadRequest("No command provided".to_string()));
    };

    if let Err(err) = state.jobs.submit_transcode(&id, input_path.clone(), &command).await {
        discard(&uploads).await;
        return Err(err.into());
    }

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { task: id })))
}

/// POST /merge: upload a video and an audio track to be muxed together.
pub async fn submit_merge(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let id = JobService::new_job_id();
    let layout = state.jobs.layout();
    let video_path = layout.merge_video(&id);
    let audio_path = layout.merge_audio(&id);
    let uploads = [video_path.as_path(), audio_path.as_path()];

    let mut has_video = false;
    let mut has_audio = false;

    while let Some(field) = next_field(&mut multipart, &uploads).await? {
        match field.name() {
            Some("video") => {
                save_field(field, &video_path, &uploads).await?;
                has_video = true;
            }
            Some("audio") => {
                save_field(field, &audio_path, &uploads).await?;
                has_audio = true;
            }
            _ => {}
        }
    }

    if !has_video || !has_audio {
        discard(&uploads).await;
        let missing = if has_video { "audio" } else { "video" };
        return Err(ApiError::BadRequest(format!("No {missing} file uploaded")));
    }

    if let Err(err) = state
        .jobs
        .submit_merge(&id, video_path.clone(), audio_path.clone())
        .await
    {
        discard(&uploads).await;
        return Err(err.into());
    }

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { task: id })))
}

/// Next multipart field; partial uploads are removed if the body is malformed.
async fn next_field<'a>(
    multipart: &'a mut Multipart,
    uploads: &[&Path],
) -> Result<Option<Field<'a>>, ApiError> {
    match multipart.next_field().await {
        Ok(field) => Ok(field),
        Err(err) => {
            discard(uploads).await;
            Err(err.into())
        }
    }
}

/// Stream a field to `path`. On any error every upload of the request is removed.
async fn save_field(field: Field<'_>, path: &Path, uploads: &[&Path]) -> Result<(), ApiError> {
    if let Err(err) = write_field(field, path).await {
        discard(uploads).await;
        return Err(err);
    }
    Ok(())
}

async fn write_field(mut field: Field<'_>, path: &Path) -> Result<(), ApiError> {
    let mut file = tokio::fs::File::create(path).await?;
    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

async fn discard(paths: &[&Path]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove upload");
            }
        }
    }
}
