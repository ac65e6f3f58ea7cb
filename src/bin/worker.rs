use batch_image_processor::{
    config::AppConfig,
    db::{self, PgRecordStore},
    routes::metrics::describe_metrics,
    services::{
        fetch::HttpImageSource,
        notifier::WebhookNotifier,
        processor::ItemProcessor,
        queue::{JobQueue, QueuedJob},
        runner::{JobRunner, Pacing, RunOutcome},
        storage,
        store::RecordStore,
        transformer::Recompressor,
    },
    shutdown::shutdown_signal,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second
const RECOVERY_BATCH: i64 = 500;
const STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting batch image worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = &config.metrics_addr {
        let addr: SocketAddr = addr.parse().expect("METRICS_ADDR must be a socket address");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        describe_metrics();
        tracing::info!(%addr, "Prometheus exporter listening");
    }

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    let records: Arc<dyn RecordStore> = Arc::new(PgRecordStore::new(db_pool));

    // Initialize services
    tracing::info!("Initializing services");
    let blobs = storage::from_config(&config)
        .await
        .expect("Failed to initialize blob store");
    let source =
        HttpImageSource::new(config.fetch_timeout(), config.max_image_bytes).expect("Failed to initialize HTTP client");
    let notifier = WebhookNotifier::new(Arc::clone(&records), config.webhook_timeout())
        .expect("Failed to initialize webhook client");

    let processor = ItemProcessor::new(
        Arc::new(source),
        blobs,
        Recompressor::new(config.image_quality),
    );
    let runner = Arc::new(JobRunner::new(
        Arc::clone(&records),
        processor,
        Arc::new(notifier),
        Pacing::from_delay(config.item_delay()),
    ));

    let queue = Arc::new(JobQueue::new(&config.redis_url).expect("Failed to initialize job queue"));

    match requeue_pending(records.as_ref(), &queue).await {
        Ok(0) => {}
        Ok(count) => tracing::info!(count, "Re-enqueued pending jobs"),
        Err(e) => tracing::warn!(error = %e, "Could not re-enqueue pending jobs"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal = shutdown_signal();
    tokio::spawn(async move {
        signal.await;
        tracing::info!("Shutdown requested, finishing in-flight jobs");
        let _ = shutdown_tx.send(true);
    });

    let sweeper = tokio::spawn(stale_sweep_loop(
        Arc::clone(&runner),
        config.stale_after(),
        shutdown_rx.clone(),
    ));

    tracing::info!(
        concurrency = config.worker_concurrency,
        "Worker ready, starting job processing loop"
    );

    let handles: Vec<_> = (0..config.worker_concurrency)
        .map(|slot| {
            let runner = Arc::clone(&runner);
            let queue = Arc::clone(&queue);
            let shutdown = shutdown_rx.clone();
            tokio::spawn(worker_loop(slot, runner, queue, shutdown))
        })
        .collect();

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker task panicked");
        }
    }
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Stale job sweeper panicked");
    }

    tracing::info!("Worker stopped");
}

/// Push every job still waiting in the database back onto the queue.
async fn requeue_pending(records: &dyn RecordStore, queue: &JobQueue) -> Result<usize, BoxError> {
    let pending = records.list_pending_jobs(RECOVERY_BATCH).await?;
    for job in &pending {
        queue.enqueue(&QueuedJob { job_id: job.id }).await?;
    }
    Ok(pending.len())
}

fn stale_cutoff(stale_after: Duration) -> Option<DateTime<Utc>> {
    let age = chrono::Duration::from_std(stale_after).ok()?;
    Utc::now().checked_sub_signed(age)
}

/// Fail jobs stuck in processing (dead worker, lost terminal write), at
/// startup and then periodically until shutdown.
async fn stale_sweep_loop(
    runner: Arc<JobRunner>,
    stale_after: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    while !*shutdown.borrow() {
        match stale_cutoff(stale_after) {
            Some(cutoff) => match runner.recover_stale(cutoff, RECOVERY_BATCH).await {
                Ok(0) => {}
                Ok(count) => tracing::warn!(count, "Failed stale processing jobs"),
                Err(e) => tracing::warn!(error = %e, "Stale job sweep failed"),
            },
            None => tracing::warn!(?stale_after, "Stale job threshold out of range, skipping sweep"),
        }

        tokio::select! {
            _ = sleep(STALE_SWEEP_INTERVAL) => {}
            _ = shutdown.changed() => {}
        }
    }
}

async fn worker_loop(
    slot: usize,
    runner: Arc<JobRunner>,
    queue: Arc<JobQueue>,
    mut shutdown: watch::Receiver<bool>,
) {
    while !*shutdown.borrow() {
        let idle = match process_next_job(&runner, &queue).await {
            Ok(true) => {
                tracing::debug!(slot, "Job processed, checking for next job");
                false
            }
            Ok(false) => {
                tracing::trace!(slot, "No jobs available, sleeping");
                true
            }
            Err(e) => {
                tracing::error!(slot, error = %e, "Error processing job, will retry");
                true
            }
        };

        if idle {
            tokio::select! {
                _ = sleep(Duration::from_millis(POLL_INTERVAL_MS)) => {}
                _ = shutdown.changed() => {}
            }
        }
    }
}

/// Process the next job from the queue.
/// Returns Ok(true) if a job was processed, Ok(false) if no job available.
async fn process_next_job(runner: &JobRunner, queue: &JobQueue) -> Result<bool, BoxError> {
    let job = match queue.dequeue().await? {
        Some(j) => j,
        None => return Ok(false),
    };

    match runner.run(job.job_id).await {
        Ok(RunOutcome::Finished(status)) => {
            tracing::info!(job_id = %job.job_id, status = %status, "Batch job finished");
        }
        Ok(RunOutcome::AlreadyClaimed(status)) => {
            tracing::info!(job_id = %job.job_id, status = %status, "Duplicate delivery ignored");
        }
        Ok(RunOutcome::Superseded) => {
            tracing::warn!(job_id = %job.job_id, "Job was failed by stale-job recovery while running");
        }
        Ok(RunOutcome::NotFound) => {
            tracing::warn!(job_id = %job.job_id, "Queued job no longer exists");
        }
        Err(e) if e.is_retryable() => {
            // Still pending in the database; put it back before dropping this delivery.
            tracing::warn!(job_id = %job.job_id, error = %e, "Could not start job, re-enqueueing");
            queue.enqueue(&job).await?;
        }
        Err(e) => {
            tracing::error!(job_id = %job.job_id, error = %e, "Could not record job state");
        }
    }

    queue.complete(&job).await?;
    Ok(true)
}
