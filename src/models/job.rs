use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle state of a media job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// `Completed` and `Failed` admit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Persisted status record, one per job id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub result_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobRecord {
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            result_location: None,
            command: None,
            error_message: None,
        }
    }
}

/// Per-field instruction for a partial status update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldUpdate<T> {
    /// Keep whatever the stored record holds.
    #[default]
    Preserve,
    /// Overwrite with this value (`None` clears the field).
    Replace(T),
}

impl<T> FieldUpdate<T> {
    pub fn apply(self, current: T) -> T {
        match self {
            FieldUpdate::Preserve => current,
            FieldUpdate::Replace(value) => value,
        }
    }
}

/// Explicit merge descriptor for [`JobStore::update_status`](crate::services::job_store::JobStore::update_status).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusUpdate {
    pub status: FieldUpdate<JobStatus>,
    pub result_location: FieldUpdate<Option<String>>,
    pub command: FieldUpdate<Option<String>>,
    pub error_message: FieldUpdate<Option<String>>,
}

impl StatusUpdate {
    pub fn processing() -> Self {
        Self {
            status: FieldUpdate::Replace(JobStatus::Processing),
            ..Self::default()
        }
    }

    pub fn completed(result_location: impl Into<String>) -> Self {
        Self {
            status: FieldUpdate::Replace(JobStatus::Completed),
            result_location: FieldUpdate::Replace(Some(result_location.into())),
            ..Self::default()
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            status: FieldUpdate::Replace(JobStatus::Failed),
            result_location: FieldUpdate::Replace(None),
            error_message: FieldUpdate::Replace(Some(error_message.into())),
            ..Self::default()
        }
    }

    /// Merge this update over `base`.
    ///
    /// An error message survives only on a `Failed` record, and a result
    /// location only on a `Completed` one, so the two are never both set.
    pub fn merge(self, base: JobRecord) -> JobRecord {
        let status = self.status.apply(base.status);
        let result_location = self.result_location.apply(base.result_location);
        let command = self.command.apply(base.command);
        let error_message = match self.error_message {
            FieldUpdate::Replace(message) => message,
            FieldUpdate::Preserve => base.error_message,
        };

        JobRecord {
            id: base.id,
            status,
            result_location: result_location.filter(|_| status == JobStatus::Completed),
            command,
            error_message: error_message.filter(|_| status == JobStatus::Failed),
        }
    }
}
