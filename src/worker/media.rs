//! Transcode and merge handlers.
//!
//! Both follow the same protocol: mark the job `PROCESSING`, run ffmpeg under
//! the runner's bounds, then record exactly one terminal status. A failure is
//! recorded and returned so the broker dead-letters the delivery; nothing here
//! retries.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::models::job::StatusUpdate;
use crate::models::payload::{download_location, MergeJob, ProcessJob, MERGE_QUEUE, PROCESS_QUEUE};
use crate::services::ffmpeg::{merge_invocation, transcode_invocation, Invocation};
use crate::services::job_store::JobStore;
use crate::services::process::ProcessRunner;
use crate::services::queue::Envelope;
use crate::worker::{HandlerError, JobHandler};

/// Shared dependencies of the ffmpeg-driven handlers.
#[derive(Clone)]
pub struct MediaContext {
    pub store: JobStore,
    pub runner: Arc<dyn ProcessRunner>,
    pub ffmpeg_path: String,
}

impl MediaContext {
    pub fn new(store: JobStore, runner: Arc<dyn ProcessRunner>, ffmpeg_path: impl Into<String>) -> Self {
        Self {
            store,
            runner,
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    async fn run_tracked(
        &self,
        queue: &'static str,
        id: &str,
        invocation: Invocation,
    ) -> Result<(), HandlerError> {
        // A redelivered job that already reached a terminal status is not run again.
        if let Some(record) = self.store.get_status(id).await? {
            if record.status.is_terminal() {
                info!(job_id = %id, status = %record.status, "Job already finished, skipping");
                return Ok(());
            }
        }

        self.store.update_status(id, StatusUpdate::processing()).await?;
        info!(job_id = %id, queue, command = %invocation, "Processing job");

        let started = Instant::now();
        let outcome = self.runner.run(&invocation).await;
        metrics::histogram!("media_job_processing_seconds", "queue" => queue)
            .record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(_) => {
                self.store
                    .update_status(id, StatusUpdate::completed(download_location(id)))
                    .await?;
                metrics::counter!("media_jobs_completed_total", "queue" => queue).increment(1);
                info!(
                    job_id = %id,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
                Ok(())
            }
            Err(err) => {
                metrics::counter!("media_jobs_failed_total", "queue" => queue).increment(1);
                error!(job_id = %id, error = %err, "Job failed");

                if let Err(store_err) = self
                    .store
                    .update_status(id, StatusUpdate::failed(err.to_string()))
                    .await
                {
                    error!(job_id = %id, error = %store_err, "Failed to record job failure");
                }
                Err(HandlerError::Process(err))
            }
        }
    }
}

/// Single input + validated command fragment.
pub struct TranscodeHandler {
    ctx: MediaContext,
}

impl TranscodeHandler {
    pub fn new(ctx: MediaContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl JobHandler for TranscodeHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let job: ProcessJob = envelope.payload()?;
        let invocation = transcode_invocation(&self.ctx.ffmpeg_path, &job);
        self.ctx.run_tracked(PROCESS_QUEUE, &job.id, invocation).await
    }
}

/// Looped video + audio track.
pub struct MergeHandler {
    ctx: MediaContext,
}

impl MergeHandler {
    pub fn new(ctx: MediaContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl JobHandler for MergeHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let job: MergeJob = envelope.payload()?;
        let invocation = merge_invocation(&self.ctx.ffmpeg_path, &job);
        self.ctx.run_tracked(MERGE_QUEUE, &job.id, invocation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobStatus;
    use crate::services::job_store::MemoryStatusBackend;
    use crate::services::process::{ProcessError, ProcessOutput};
    use crate::services::queue::{MemoryBroker, QueueBroker};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records invocations and replies with a fixed outcome.
    struct ScriptedRunner {
        fail_with: Option<fn() -> ProcessError>,
        seen: Mutex<Vec<Invocation>>,
    }

    impl ScriptedRunner {
        fn succeeding() -> Self {
            Self { fail_with: None, seen: Mutex::new(Vec::new()) }
        }

        fn failing(make: fn() -> ProcessError) -> Self {
            Self { fail_with: Some(make), seen: Mutex::new(Vec::new()) }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ProcessRunner for ScriptedRunner {
        async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
            self.seen.lock().unwrap().push(invocation.clone());
            match self.fail_with {
                Some(make) => Err(make()),
                None => Ok(ProcessOutput::default()),
            }
        }
    }

    fn store() -> JobStore {
        JobStore::new(Arc::new(MemoryStatusBackend::new()), Duration::from_secs(86_400))
    }

    async fn envelope_for<T: serde::Serialize + Sync>(queue: &str, payload: &T) -> Envelope {
        let broker: Arc<dyn QueueBroker> = Arc::new(MemoryBroker::new());
        broker.enqueue(queue, payload, None).await.unwrap();
        broker.reserve(queue, "test").await.unwrap().unwrap().envelope
    }

    fn process_job() -> ProcessJob {
        ProcessJob {
            id: "job-1".into(),
            input_path: "/tmp/job-1.mpg".into(),
            output_path: "/tmp/job-1_output.mp4".into(),
            command_fragment: r#"-filter:v "setpts=3.0*PTS""#.into(),
        }
    }

    #[tokio::test]
    async fn test_transcode_success_completes_job() {
        let store = store();
        store.set_status("job-1", JobStatus::Pending, None, None, None).await.unwrap();
        let runner = Arc::new(ScriptedRunner::succeeding());
        let handler = TranscodeHandler::new(MediaContext::new(store.clone(), runner.clone(), "ffmpeg"));

        let envelope = envelope_for(PROCESS_QUEUE, &process_job()).await;
        handler.handle(&envelope).await.unwrap();

        let record = store.get_status("job-1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.result_location.as_deref(), Some("/download/job-1"));
        assert!(record.error_message.is_none());

        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen[0].args[0], "-i");
        assert_eq!(seen[0].args[3], "setpts=3.0*PTS");
    }

    #[tokio::test]
    async fn test_timeout_marks_job_failed_and_reraises() {
        let store = store();
        store.set_status("job-1", JobStatus::Pending, None, None, None).await.unwrap();
        let runner = Arc::new(ScriptedRunner::failing(|| {
            ProcessError::Timeout(Duration::from_secs(300))
        }));
        let handler = TranscodeHandler::new(MediaContext::new(store.clone(), runner, "ffmpeg"));

        let envelope = envelope_for(PROCESS_QUEUE, &process_job()).await;
        let err = handler.handle(&envelope).await.unwrap_err();
        assert!(matches!(err, HandlerError::Process(ProcessError::Timeout(_))));

        let record = store.get_status("job-1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.result_location.is_none());
        assert!(record.error_message.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_terminal_job_is_not_rerun() {
        let store = store();
        store
            .set_status("job-1", JobStatus::Completed, Some("/download/job-1".into()), None, None)
            .await
            .unwrap();
        let runner = Arc::new(ScriptedRunner::failing(|| ProcessError::NonZeroExit {
            code: Some(1),
            stderr: String::new(),
        }));
        let handler = TranscodeHandler::new(MediaContext::new(store.clone(), runner.clone(), "ffmpeg"));

        let envelope = envelope_for(PROCESS_QUEUE, &process_job()).await;
        handler.handle(&envelope).await.unwrap();

        assert_eq!(runner.calls(), 0);
        let record = store.get_status("job-1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_nonzero_exit_records_stderr() {
        let store = store();
        store.set_status("job-1", JobStatus::Pending, None, None, None).await.unwrap();
        let runner = Arc::new(ScriptedRunner::failing(|| ProcessError::NonZeroExit {
            code: Some(1),
            stderr: "Invalid argument".into(),
        }));
        let handler = TranscodeHandler::new(MediaContext::new(store.clone(), runner.clone(), "ffmpeg"));

        let envelope = envelope_for(PROCESS_QUEUE, &process_job()).await;
        let err = handler.handle(&envelope).await.unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Process(ProcessError::NonZeroExit { code: Some(1), .. })
        ));

        assert_eq!(runner.calls(), 1);
        let record = store.get_status("job-1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.result_location.is_none());
        assert!(record.error_message.unwrap().contains("Invalid argument"));
    }

    #[tokio::test]
    async fn test_spawn_failure_marks_merge_failed() {
        let store = store();
        let runner = Arc::new(ScriptedRunner::failing(|| ProcessError::Spawn {
            program: "ffmpeg".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
        }));
        let handler = MergeHandler::new(MediaContext::new(store.clone(), runner, "ffmpeg"));

        let job = MergeJob {
            id: "m-1".into(),
            video_path: "/tmp/m-1_video.mp4".into(),
            audio_path: "/tmp/m-1_audio.mp3".into(),
            output_path: "/tmp/m-1_output.mp4".into(),
        };
        let envelope = envelope_for(MERGE_QUEUE, &job).await;
        let err = handler.handle(&envelope).await.unwrap_err();
        assert!(matches!(err, HandlerError::Process(ProcessError::Spawn { .. })));

        let record = store.get_status("m-1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error_message.unwrap().contains("Failed to launch ffmpeg"));
    }

    #[tokio::test]
    async fn test_failed_job_is_not_rerun() {
        let store = store();
        store
            .set_status("job-1", JobStatus::Failed, None, Some("first attempt".into()), None)
            .await
            .unwrap();
        let runner = Arc::new(ScriptedRunner::succeeding());
        let handler = TranscodeHandler::new(MediaContext::new(store.clone(), runner.clone(), "ffmpeg"));

        let envelope = envelope_for(PROCESS_QUEUE, &process_job()).await;
        handler.handle(&envelope).await.unwrap();

        assert_eq!(runner.calls(), 0);
        let record = store.get_status("job-1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("first attempt"));
        assert!(record.result_location.is_none());
    }

    #[tokio::test]
    async fn test_merge_runs_fixed_invocation() {
        let store = store();
        let runner = Arc::new(ScriptedRunner::succeeding());
        let handler = MergeHandler::new(MediaContext::new(store.clone(), runner.clone(), "ffmpeg"));

        let job = MergeJob {
            id: "m-1".into(),
            video_path: "/tmp/m-1_video.mp4".into(),
            audio_path: "/tmp/m-1_audio.mp3".into(),
            output_path: "/tmp/m-1_output.mp4".into(),
        };
        let envelope = envelope_for(MERGE_QUEUE, &job).await;
        handler.handle(&envelope).await.unwrap();

        let record = store.get_status("m-1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(runner.seen.lock().unwrap()[0], merge_invocation("ffmpeg", &job));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_a_handler_error() {
        let handler = TranscodeHandler::new(MediaContext::new(
            store(),
            Arc::new(ScriptedRunner::succeeding()),
            "ffmpeg",
        ));
        let envelope = envelope_for(PROCESS_QUEUE, &serde_json::json!({ "id": 5 })).await;
        assert!(matches!(
            handler.handle(&envelope).await.unwrap_err(),
            HandlerError::Payload(_)
        ));
    }
}
