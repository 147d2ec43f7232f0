//! Bounded subprocess execution.

use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::services::ffmpeg::Invocation;

/// Bytes of stderr kept in a failure message.
const STDERR_TAIL_BYTES: usize = 2048;

/// Captured output of a successful run.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Runs an [`Invocation`] to completion.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError>;
}

/// Spawns the program with tokio, enforcing a wall-clock timeout and a
/// per-stream output cap. The child is killed when either is exceeded.
#[derive(Debug, Clone)]
pub struct TokioProcessRunner {
    timeout: Duration,
    max_output_bytes: usize,
}

impl TokioProcessRunner {
    pub fn new(timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            timeout,
            max_output_bytes,
        }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
        debug!(command = %invocation, "Spawning process");

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(ProcessError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(ProcessError::MissingPipe("stderr"))?;
        let cap = self.max_output_bytes;

        let outcome = tokio::time::timeout(self.timeout, async {
            let (stdout, stderr) = tokio::try_join!(
                read_capped(stdout, cap, "stdout"),
                read_capped(stderr, cap, "stderr"),
            )?;
            let status = child.wait().await?;
            Ok::<_, ProcessError>((status, stdout, stderr))
        })
        .await;

        let (status, stdout, stderr) = match outcome {
            Ok(Ok(collected)) => collected,
            Ok(Err(err)) => {
                warn!(command = %invocation, error = %err, "Process aborted, killing");
                let _ = child.kill().await;
                return Err(err);
            }
            Err(_) => {
                warn!(
                    command = %invocation,
                    timeout_secs = self.timeout.as_secs(),
                    "Process timed out, killing"
                );
                let _ = child.kill().await;
                return Err(ProcessError::Timeout(self.timeout));
            }
        };

        if !stderr.is_empty() {
            debug!(stderr = %String::from_utf8_lossy(&stderr), "Process stderr");
        }

        if status.success() {
            Ok(ProcessOutput { stdout, stderr })
        } else {
            Err(ProcessError::exit(status, &stderr))
        }
    }
}

async fn read_capped<R: AsyncRead + Unpin>(
    mut reader: R,
    cap: usize,
    stream: &'static str,
) -> Result<Vec<u8>, ProcessError> {
    let mut collected = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(collected);
        }
        if collected.len() + n > cap {
            return Err(ProcessError::OutputLimitExceeded { stream, limit: cap });
        }
        collected.extend_from_slice(&chunk[..n]);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process exceeded timeout of {}s and was killed", .0.as_secs())]
    Timeout(Duration),

    #[error("Process {stream} exceeded output limit of {limit} bytes")]
    OutputLimitExceeded { stream: &'static str, limit: usize },

    #[error("Process exited with {}: {stderr}", describe_exit(.code))]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Process {0} pipe was not captured")]
    MissingPipe(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "signal".to_string(),
    }
}

impl ProcessError {
    fn exit(status: ExitStatus, stderr: &[u8]) -> Self {
        let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
        ProcessError::NonZeroExit {
            code: status.code(),
            stderr: String::from_utf8_lossy(&stderr[start..]).trim().to_string(),
        }
    }
}
