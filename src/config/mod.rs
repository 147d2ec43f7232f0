use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::validation::ValidationPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Ignored by worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for the job store and queues
    pub redis_url: String,

    /// Bearer token for protected routes. Authentication is disabled when unset.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Path or name of the ffmpeg executable
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Directory holding uploaded inputs and rendered outputs
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Wall-clock limit for a single ffmpeg run
    #[serde(default = "default_process_timeout_secs")]
    pub process_timeout_secs: u64,

    /// Cap on captured stdout/stderr bytes per stream
    #[serde(default = "default_process_max_output_bytes")]
    pub process_max_output_bytes: usize,

    /// Concurrent jobs per worker flavor
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Retention of job status records
    #[serde(default = "default_status_ttl_secs")]
    pub status_ttl_secs: u64,

    /// Delay between a download and removal of its artifacts
    #[serde(default = "default_cleanup_delay_secs")]
    pub cleanup_delay_secs: u64,

    /// Largest accepted request body
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Identifies this worker's in-flight list so it can reclaim it after a crash
    #[serde(default = "default_worker_id")]
    pub worker_id: String,

    /// Idle back-off between empty queue polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Which command grammar gates user-supplied fragments
    #[serde(default)]
    pub command_policy: ValidationPolicy,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_process_timeout_secs() -> u64 {
    300
}

fn default_process_max_output_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_worker_concurrency() -> usize {
    2
}

fn default_status_ttl_secs() -> u64 {
    86_400
}

fn default_cleanup_delay_secs() -> u64 {
    3_600
}

fn default_max_upload_bytes() -> usize {
    500 * 1024 * 1024
}

fn default_worker_id() -> String {
    "worker-1".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Configuration with every default applied, pointing at the given Redis URL.
    pub fn with_defaults(redis_url: impl Into<String>) -> Self {
        Self {
            bind_addr: default_bind_addr(),
            redis_url: redis_url.into(),
            api_token: None,
            ffmpeg_path: default_ffmpeg_path(),
            work_dir: default_work_dir(),
            process_timeout_secs: default_process_timeout_secs(),
            process_max_output_bytes: default_process_max_output_bytes(),
            worker_concurrency: default_worker_concurrency(),
            status_ttl_secs: default_status_ttl_secs(),
            cleanup_delay_secs: default_cleanup_delay_secs(),
            max_upload_bytes: default_max_upload_bytes(),
            worker_id: default_worker_id(),
            poll_interval_ms: default_poll_interval_ms(),
            command_policy: ValidationPolicy::default(),
        }
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs)
    }

    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.status_ttl_secs)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.cleanup_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
