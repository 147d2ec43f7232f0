use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use media_job_runner::{
    app_state::AppState,
    config::AppConfig,
    models::payload::ArtifactLayout,
    routes,
    services::{
        cleanup::CleanupScheduler,
        job_store::{JobStore, RedisStatusBackend},
        jobs::JobService,
        queue::{QueueBroker, RedisBroker},
        validation::CommandValidator,
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Server exited with error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;

    tracing::info!("Initializing media-job-runner server");

    let prometheus_handle = Arc::new(PrometheusBuilder::new().install_recorder()?);
    routes::metrics::describe_metrics();

    if config.api_token.is_none() {
        tracing::warn!("API_TOKEN is not set, protected routes accept unauthenticated requests");
    }

    tokio::fs::create_dir_all(&config.work_dir).await?;

    tracing::info!("Connecting to Redis");
    let backend = Arc::new(RedisStatusBackend::new(&config.redis_url)?);
    let broker: Arc<dyn QueueBroker> = Arc::new(RedisBroker::new(&config.redis_url)?);

    let store = JobStore::new(backend, config.status_ttl());
    let cleanup = CleanupScheduler::new(broker.clone(), config.cleanup_delay());
    let jobs = JobService::new(
        store,
        broker.clone(),
        CommandValidator::new(config.command_policy),
        cleanup,
        ArtifactLayout::new(config.work_dir.clone()),
        config.ffmpeg_path.clone(),
    );

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(jobs, broker, config);

    let app = routes::router(state).route(
        "/metrics",
        get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
    );

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
