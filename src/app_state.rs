use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{jobs::JobService, queue::QueueBroker};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobService>,
    pub broker: Arc<dyn QueueBroker>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(jobs: JobService, broker: Arc<dyn QueueBroker>, config: AppConfig) -> Self {
        Self {
            jobs: Arc::new(jobs),
            broker,
            config: Arc::new(config),
        }
    }
}
