//! Media job runner
//!
//! Accepts video uploads with a restricted ffmpeg filter fragment (or a
//! video/audio pair to merge), queues the work in Redis, runs ffmpeg in a
//! worker process under a time limit, and serves the result for download
//! before cleaning up the artifacts.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
pub mod worker;
