use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Prometheus text exposition of the job counters and timings.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the service and workers emit.
pub fn describe_metrics() {
    metrics::describe_counter!("media_jobs_submitted_total", "Jobs accepted and queued");
    metrics::describe_counter!("media_jobs_rejected_total", "Command fragments refused by validation");
    metrics::describe_counter!("media_jobs_completed_total", "Jobs that reached COMPLETED");
    metrics::describe_counter!("media_jobs_failed_total", "Jobs that reached FAILED");
    metrics::describe_histogram!(
        "media_job_processing_seconds",
        "Wall-clock time of a single ffmpeg run"
    );
    metrics::describe_counter!("media_downloads_total", "Outputs streamed to clients");
    metrics::describe_counter!(
        "media_cleanup_files_removed_total",
        "Artifacts deleted by cleanup jobs"
    );
}
