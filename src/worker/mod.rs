//! Queue consumers.
//!
//! A [`WorkerPool`] owns its queue bindings: each registration pairs a queue
//! with a handler and a concurrency limit, and [`WorkerPool::run`] drives all
//! of them until shutdown is signalled.

pub mod cleanup;
pub mod media;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::services::job_store::StoreError;
use crate::services::process::ProcessError;
use crate::services::queue::{Delivery, Envelope, QueueBroker, QueueError};

pub use cleanup::CleanupHandler;
pub use media::{MergeHandler, TranscodeHandler};

/// Handles one delivered envelope. An `Err` marks the delivery failed.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Invalid payload: {0}")]
    Payload(#[from] QueueError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

struct Registration {
    queue: String,
    concurrency: usize,
    handler: Arc<dyn JobHandler>,
}

pub struct WorkerPool {
    broker: Arc<dyn QueueBroker>,
    consumer_id: String,
    poll_interval: Duration,
    registrations: Vec<Registration>,
}

impl WorkerPool {
    pub fn new(
        broker: Arc<dyn QueueBroker>,
        consumer_id: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            broker,
            consumer_id: consumer_id.into(),
            poll_interval,
            registrations: Vec::new(),
        }
    }

    /// Bind `handler` to `queue`, running at most `concurrency` deliveries at once.
    pub fn register(
        mut self,
        queue: impl Into<String>,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        self.registrations.push(Registration {
            queue: queue.into(),
            concurrency: concurrency.max(1),
            handler,
        });
        self
    }

    /// Reserve and handle a single delivery from `queue` inline.
    /// Returns `Ok(true)` if a delivery was processed, `Ok(false)` if none was ready.
    pub async fn process_next(&self, queue: &str) -> Result<bool, QueueError> {
        let Some(registration) = self.registrations.iter().find(|r| r.queue == queue) else {
            return Ok(false);
        };

        match self.broker.reserve(queue, &self.consumer_id).await? {
            Some(delivery) => {
                dispatch(self.broker.as_ref(), registration.handler.as_ref(), delivery).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Consume every registered queue until `shutdown` flips to `true`, then
    /// wait for in-flight deliveries to finish.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), QueueError> {
        for registration in &self.registrations {
            let recovered = self
                .broker
                .recover(&registration.queue, &self.consumer_id)
                .await?;
            if recovered > 0 {
                warn!(
                    queue = %registration.queue,
                    recovered,
                    "Re-queued deliveries left unfinished by a previous run"
                );
            }
        }

        let mut consumers = JoinSet::new();
        for registration in self.registrations {
            info!(
                queue = %registration.queue,
                concurrency = registration.concurrency,
                "Starting consumer"
            );
            consumers.spawn(consume(
                self.broker.clone(),
                self.consumer_id.clone(),
                self.poll_interval,
                registration,
                shutdown.clone(),
            ));
        }

        while let Some(joined) = consumers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Consumer task aborted");
            }
        }

        info!("Worker pool stopped");
        Ok(())
    }
}

async fn consume(
    broker: Arc<dyn QueueBroker>,
    consumer_id: String,
    poll_interval: Duration,
    registration: Registration,
    mut shutdown: watch::Receiver<bool>,
) {
    let limiter = Arc::new(Semaphore::new(registration.concurrency));
    let mut in_flight = JoinSet::new();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let permit = tokio::select! {
            permit = limiter.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown.changed() => break,
        };

        while let Some(joined) = in_flight.try_join_next() {
            if let Err(e) = joined {
                error!(queue = %registration.queue, error = %e, "Handler task panicked");
            }
        }

        match broker.reserve(&registration.queue, &consumer_id).await {
            Ok(Some(delivery)) => {
                let broker = broker.clone();
                let handler = registration.handler.clone();
                in_flight.spawn(async move {
                    dispatch(broker.as_ref(), handler.as_ref(), delivery).await;
                    drop(permit);
                });
            }
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    _ = sleep(poll_interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
            Err(e) => {
                drop(permit);
                error!(queue = %registration.queue, error = %e, "Failed to reserve job");
                tokio::select! {
                    _ = sleep(poll_interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }

    debug!(queue = %registration.queue, in_flight = in_flight.len(), "Draining consumer");
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(queue = %registration.queue, error = %e, "Handler task panicked");
        }
    }
}

/// Run the handler and settle the delivery with the broker.
async fn dispatch(broker: &dyn QueueBroker, handler: &dyn JobHandler, delivery: Delivery) {
    let queue = delivery.envelope.queue.clone();
    let envelope_id = delivery.envelope.id;

    match handler.handle(&delivery.envelope).await {
        Ok(()) => {
            debug!(%queue, %envelope_id, "Delivery completed");
            if let Err(e) = broker.ack(&delivery).await {
                error!(%queue, %envelope_id, error = %e, "Failed to acknowledge delivery");
            }
        }
        Err(err) => {
            warn!(%queue, %envelope_id, error = %err, "Delivery failed");
            if let Err(e) = broker.fail(&delivery, &err.to_string()).await {
                error!(%queue, %envelope_id, error = %e, "Failed to record delivery failure");
            }
        }
    }
}
