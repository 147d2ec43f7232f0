use serde::{Deserialize, Serialize};

use crate::models::job::JobStatus;

/// Response after a job is accepted for processing.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task: String,
}

/// Error body returned by every route.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}
