use media_job_runner::{
    config::AppConfig,
    models::payload::{CLEANUP_QUEUE, MERGE_QUEUE, PROCESS_QUEUE},
    services::{
        job_store::{JobStore, RedisStatusBackend},
        process::TokioProcessRunner,
        queue::{QueueBroker, RedisBroker},
    },
    worker::{media::MediaContext, CleanupHandler, MergeHandler, TranscodeHandler, WorkerPool},
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Cleanup deliveries are handled one at a time.
const CLEANUP_CONCURRENCY: usize = 1;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting media job worker");

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Worker exited with error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;

    tracing::info!("Connecting to Redis");
    let backend = Arc::new(RedisStatusBackend::new(&config.redis_url)?);
    let broker: Arc<dyn QueueBroker> = Arc::new(RedisBroker::new(&config.redis_url)?);
    broker.ping().await?;

    let store = JobStore::new(backend, config.status_ttl());
    let runner = Arc::new(TokioProcessRunner::new(
        config.process_timeout(),
        config.process_max_output_bytes,
    ));
    let ctx = MediaContext::new(store, runner, config.ffmpeg_path.clone());

    let pool = WorkerPool::new(broker, config.worker_id.clone(), config.poll_interval())
        .register(
            PROCESS_QUEUE,
            config.worker_concurrency,
            Arc::new(TranscodeHandler::new(ctx.clone())),
        )
        .register(
            MERGE_QUEUE,
            config.worker_concurrency,
            Arc::new(MergeHandler::new(ctx)),
        )
        .register(CLEANUP_QUEUE, CLEANUP_CONCURRENCY, Arc::new(CleanupHandler::new()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received, draining in-flight jobs");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // Dropping the sender would stop the pool, so keep it alive.
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        }
    });

    tracing::info!(
        worker_id = %config.worker_id,
        timeout_secs = config.process_timeout_secs,
        "Worker ready, consuming queues"
    );
    pool.run(shutdown_rx).await?;

    tracing::info!("Worker stopped");
    Ok(())
}
