//! Shared wiring for integration tests: in-memory backends, a temporary work
//! directory, and request builders.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use media_job_runner::{
    app_state::AppState,
    config::AppConfig,
    models::payload::{ArtifactLayout, CLEANUP_QUEUE, MERGE_QUEUE, PROCESS_QUEUE},
    routes,
    services::{
        cleanup::CleanupScheduler,
        ffmpeg::Invocation,
        job_store::{JobStore, MemoryStatusBackend},
        jobs::JobService,
        process::{ProcessError, ProcessOutput, ProcessRunner},
        queue::{MemoryBroker, QueueBroker},
        validation::CommandValidator,
    },
    worker::{media::MediaContext, CleanupHandler, MergeHandler, TranscodeHandler, WorkerPool},
};

pub const BOUNDARY: &str = "media-job-runner-test-boundary";
pub const RENDERED: &[u8] = b"rendered video bytes";

/// The API and worker wired against in-memory backends and a temp work dir.
pub struct Harness {
    pub state: AppState,
    pub store: JobStore,
    pub status_backend: Arc<MemoryStatusBackend>,
    pub broker: Arc<MemoryBroker>,
    pub work_dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_token(None)
    }

    pub fn with_token(token: Option<&str>) -> Self {
        let work_dir = tempfile::tempdir().unwrap();

        let mut config = AppConfig::with_defaults("redis://unused");
        config.work_dir = work_dir.path().to_path_buf();
        config.api_token = token.map(str::to_string);

        let status_backend = Arc::new(MemoryStatusBackend::new());
        let broker = Arc::new(MemoryBroker::new());
        let dyn_broker: Arc<dyn QueueBroker> = broker.clone();

        let store = JobStore::new(status_backend.clone(), config.status_ttl());
        let jobs = JobService::new(
            store.clone(),
            dyn_broker.clone(),
            CommandValidator::new(config.command_policy),
            CleanupScheduler::new(dyn_broker.clone(), config.cleanup_delay()),
            ArtifactLayout::new(config.work_dir.clone()),
            config.ffmpeg_path.clone(),
        );

        Self {
            state: AppState::new(jobs, dyn_broker, config),
            store,
            status_backend,
            broker,
            work_dir,
        }
    }

    pub fn router(&self) -> Router {
        routes::router(self.state.clone())
    }

    pub fn layout(&self) -> &ArtifactLayout {
        self.state.jobs.layout()
    }

    /// A pool consuming all three queues with the given runner.
    pub fn worker_pool(&self, runner: Arc<dyn ProcessRunner>) -> WorkerPool {
        let ctx = MediaContext::new(self.store.clone(), runner, "ffmpeg");
        let broker: Arc<dyn QueueBroker> = self.broker.clone();

        WorkerPool::new(broker, "test-worker", Duration::from_millis(10))
            .register(PROCESS_QUEUE, 2, Arc::new(TranscodeHandler::new(ctx.clone())))
            .register(MERGE_QUEUE, 2, Arc::new(MergeHandler::new(ctx)))
            .register(CLEANUP_QUEUE, 1, Arc::new(CleanupHandler::new()))
    }

    /// Files currently in the work directory.
    pub fn artifacts(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(self.work_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        paths.sort();
        paths
    }
}

/// Stands in for ffmpeg: writes [`RENDERED`] to the output path (the last
/// argument) and records every invocation.
#[derive(Default)]
pub struct FakeFfmpeg {
    pub seen: Mutex<Vec<Invocation>>,
}

impl FakeFfmpeg {
    pub fn invocations(&self) -> Vec<Invocation> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessRunner for FakeFfmpeg {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
        self.seen.lock().unwrap().push(invocation.clone());
        let output = invocation.args.last().expect("invocation names an output");
        tokio::fs::write(output, RENDERED).await?;
        Ok(ProcessOutput::default())
    }
}

/// Runs a fixed substitute program instead of the requested invocation, so
/// real timeout handling can be exercised without ffmpeg installed.
pub struct Substitute<R> {
    pub inner: R,
    pub program: Invocation,
}

#[async_trait]
impl<R: ProcessRunner> ProcessRunner for Substitute<R> {
    async fn run(&self, _invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
        self.inner.run(&self.program).await
    }
}

pub enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, filename, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_request(uri: &str, parts: &[Part<'_>], token: Option<&str>) -> Request<Body> {
    multipart_request_with_body(uri, multipart_body(parts), token)
}

/// Like [`multipart_request`], but the stream stops inside the last part.
pub fn truncated_multipart_request(
    uri: &str,
    parts: &[Part<'_>],
    token: Option<&str>,
) -> Request<Body> {
    let mut body = multipart_body(parts);
    let closing = format!("\r\n--{BOUNDARY}--\r\n").len();
    body.truncate(body.len() - closing);
    multipart_request_with_body(uri, body, token)
}

fn multipart_request_with_body(uri: &str, body: Vec<u8>, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::post(uri).header(
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={BOUNDARY}"),
    );
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).unwrap()
}

pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
