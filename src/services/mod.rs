pub mod cleanup;
pub mod ffmpeg;
pub mod job_store;
pub mod jobs;
pub mod process;
pub mod queue;
pub mod validation;
