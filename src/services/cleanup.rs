use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::payload::{CleanupJob, CLEANUP_QUEUE};
use crate::services::queue::{QueueBroker, QueueError};

/// Schedules delayed removal of a job's artifacts.
#[derive(Clone)]
pub struct CleanupScheduler {
    broker: Arc<dyn QueueBroker>,
    delay: Duration,
}

impl CleanupScheduler {
    pub fn new(broker: Arc<dyn QueueBroker>, delay: Duration) -> Self {
        Self { broker, delay }
    }

    pub async fn schedule(&self, job: &CleanupJob) -> Result<Uuid, QueueError> {
        let id = self
            .broker
            .enqueue(CLEANUP_QUEUE, job, Some(self.delay))
            .await?;

        tracing::info!(
            envelope_id = %id,
            output_path = %job.output_path.display(),
            delay_secs = self.delay.as_secs(),
            "Cleanup scheduled"
        );
        Ok(id)
    }
}
