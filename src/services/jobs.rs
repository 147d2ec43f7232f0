//! Job submission and download hand-off.
//!
//! Submissions are validated before anything is written: a rejected command
//! leaves no status record and no queue entry behind.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::File;
use uuid::Uuid;

use crate::models::job::{JobRecord, JobStatus};
use crate::models::payload::{ArtifactLayout, CleanupJob, MergeJob, ProcessJob, MERGE_QUEUE, PROCESS_QUEUE};
use crate::services::cleanup::CleanupScheduler;
use crate::services::ffmpeg::{merge_invocation, transcode_invocation};
use crate::services::job_store::{JobStore, StoreError};
use crate::services::queue::{QueueBroker, QueueError};
use crate::services::validation::{CommandValidator, ValidationError};

/// An output file ready to stream, with cleanup already scheduled.
pub struct Download {
    pub file: File,
    pub file_name: String,
}

pub struct JobService {
    store: JobStore,
    broker: Arc<dyn QueueBroker>,
    validator: CommandValidator,
    cleanup: CleanupScheduler,
    layout: ArtifactLayout,
    ffmpeg_path: String,
}

impl JobService {
    pub fn new(
        store: JobStore,
        broker: Arc<dyn QueueBroker>,
        validator: CommandValidator,
        cleanup: CleanupScheduler,
        layout: ArtifactLayout,
        ffmpeg_path: impl Into<String>,
    ) -> Self {
        Self {
            store,
            broker,
            validator,
            cleanup,
            layout,
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Fresh job identifier.
    pub fn new_job_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Queue a transcode of an already-stored input.
    pub async fn submit_transcode(
        &self,
        id: &str,
        input_path: PathBuf,
        command_fragment: &str,
    ) -> Result<(), SubmitError> {
        if let Err(err) = self.validator.validate(command_fragment) {
            metrics::counter!("media_jobs_rejected_total").increment(1);
            tracing::warn!(job_id = %id, error = %err, "Command rejected");
            return Err(SubmitError::Validation(err));
        }

        let job = ProcessJob {
            id: id.to_string(),
            input_path,
            output_path: self.layout.output(id),
            command_fragment: command_fragment.to_string(),
        };
        let command = transcode_invocation(&self.ffmpeg_path, &job).to_string();

        self.store
            .set_status(id, JobStatus::Pending, None, None, Some(command))
            .await?;
        self.broker.enqueue(PROCESS_QUEUE, &job, None).await?;

        metrics::counter!("media_jobs_submitted_total", "kind" => "transcode").increment(1);
        tracing::info!(job_id = %id, "Transcode job queued");
        Ok(())
    }

    /// Queue a merge of an already-stored video and audio track.
    pub async fn submit_merge(
        &self,
        id: &str,
        video_path: PathBuf,
        audio_path: PathBuf,
    ) -> Result<(), SubmitError> {
        let job = MergeJob {
            id: id.to_string(),
            video_path,
            audio_path,
            output_path: self.layout.output(id),
        };
        let command = merge_invocation(&self.ffmpeg_path, &job).to_string();

        self.store
            .set_status(id, JobStatus::Pending, None, None, Some(command))
            .await?;
        self.broker.enqueue(MERGE_QUEUE, &job, None).await?;

        metrics::counter!("media_jobs_submitted_total", "kind" => "merge").increment(1);
        tracing::info!(job_id = %id, "Merge job queued");
        Ok(())
    }

    pub async fn store_health(&self) -> Result<(), StoreError> {
        self.store.health_check().await
    }

    pub async fn status(&self, id: &str) -> Result<Option<JobRecord>, StoreError> {
        self.store.get_status(id).await
    }

    /// Open a completed job's output and schedule removal of its artifacts.
    ///
    /// Only the first successful download of a job schedules a cleanup.
    pub async fn prepare_download(&self, id: &str) -> Result<Download, DownloadError> {
        let record = self
            .store
            .get_status(id)
            .await?
            .ok_or(DownloadError::NotFound)?;

        if record.status != JobStatus::Completed {
            return Err(DownloadError::NotCompleted(record.status));
        }

        let output_path = self.layout.output(id);
        let file = match File::open(&output_path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(DownloadError::OutputMissing)
            }
            Err(err) => return Err(DownloadError::Io(err)),
        };

        if self.store.claim_cleanup(id).await? {
            if let Err(err) = self.cleanup.schedule(&self.cleanup_job(id)).await {
                self.store.release_cleanup(id).await?;
                return Err(err.into());
            }
        }

        Ok(Download {
            file,
            file_name: ArtifactLayout::output_file_name(id),
        })
    }

    /// Every path either job kind may have left behind. Removal ignores
    /// missing files, so the job kind need not be known.
    fn cleanup_job(&self, id: &str) -> CleanupJob {
        CleanupJob {
            input_path: self.layout.transcode_input(id),
            output_path: self.layout.output(id),
            additional_paths: vec![self.layout.merge_video(id), self.layout.merge_audio(id)],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Job not found")]
    NotFound,

    #[error("Video processing not completed")]
    NotCompleted(JobStatus),

    #[error("Processed video file not found")]
    OutputMissing,

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
