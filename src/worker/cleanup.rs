use async_trait::async_trait;
use std::io::ErrorKind;
use tracing::debug;

use crate::models::payload::CleanupJob;
use crate::services::queue::Envelope;
use crate::worker::{HandlerError, JobHandler};

/// Deletes a downloaded job's artifacts. Missing files are skipped, so a
/// redelivered cleanup is a no-op. Never touches the status record.
#[derive(Debug, Default)]
pub struct CleanupHandler;

impl CleanupHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for CleanupHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let job: CleanupJob = envelope.payload()?;
        let mut removed = 0u64;

        for path in job.paths() {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {
                    removed += 1;
                    debug!(path = %path.display(), "Deleted artifact");
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(path = %path.display(), "Artifact already gone");
                }
                Err(e) => return Err(HandlerError::Io(e)),
            }
        }

        metrics::counter!("media_cleanup_files_removed_total").increment(removed);
        debug!(removed, "Cleanup completed");
        Ok(())
    }
}
