use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Queue carrying single-input transcode jobs.
pub const PROCESS_QUEUE: &str = "video-process";

/// Queue carrying video + audio merge jobs.
pub const MERGE_QUEUE: &str = "merge-process";

/// Queue carrying delayed artifact removal.
pub const CLEANUP_QUEUE: &str = "cleanup";

/// Transcode one input with a validated command fragment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessJob {
    pub id: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub command_fragment: String,
}

/// Loop a video against an audio track.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MergeJob {
    pub id: String,
    pub video_path: PathBuf,
    pub audio_path: PathBuf,
    pub output_path: PathBuf,
}

/// Remove the artifacts of a downloaded job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CleanupJob {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Further inputs, e.g. the audio track of a merge job.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_paths: Vec<PathBuf>,
}

impl CleanupJob {
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        [self.input_path.as_path(), self.output_path.as_path()]
            .into_iter()
            .chain(self.additional_paths.iter().map(PathBuf::as_path))
    }
}

/// Download reference recorded on a completed job.
pub fn download_location(id: &str) -> String {
    format!("/download/{id}")
}

/// Where a job's files live under the work directory.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    work_dir: PathBuf,
}

impl ArtifactLayout {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn transcode_input(&self, id: &str) -> PathBuf {
        self.work_dir.join(format!("{id}.mpg"))
    }

    pub fn merge_video(&self, id: &str) -> PathBuf {
        self.work_dir.join(format!("{id}_video.mp4"))
    }

    pub fn merge_audio(&self, id: &str) -> PathBuf {
        self.work_dir.join(format!("{id}_audio.mp3"))
    }

    pub fn output(&self, id: &str) -> PathBuf {
        self.work_dir.join(format!("{id}_output.mp4"))
    }

    pub fn output_file_name(id: &str) -> String {
        format!("{id}_output.mp4")
    }
}
