use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;

/// Describe the metrics emitted by the API and the worker.
pub fn describe_metrics() {
    metrics::describe_counter!("batch_jobs_submitted_total", "Batch jobs accepted for processing");
    metrics::describe_counter!("batch_jobs_completed_total", "Batch jobs that reached COMPLETED");
    metrics::describe_counter!("batch_jobs_failed_total", "Batch jobs that reached FAILED");
    metrics::describe_counter!("batch_images_processed_total", "Images recompressed and stored");
    metrics::describe_counter!("batch_images_failed_total", "Images that could not be processed, by stage");
    metrics::describe_counter!("batch_notifications_total", "Completion webhook attempts, by outcome");
    metrics::describe_histogram!("batch_job_processing_seconds", "Time to process a batch job");
    metrics::describe_gauge!("batch_queue_depth", "Jobs waiting in the queue");
}

/// Install the Prometheus recorder used by the `/metrics` endpoint.
pub fn install_recorder() -> Result<Arc<PrometheusHandle>, metrics_exporter_prometheus::BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(Arc::new(handle))
}

/// Prometheus metrics scrape endpoint.
/// Returns metrics in Prometheus text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
