//! Drives a batch job from `Pending` to a terminal state.
//!
//! The runner claims the job, walks its items one at a time through the
//! [`ItemProcessor`], persists each item's results as soon as they are known,
//! and finally records `Completed` or `Failed` and fires the completion
//! notification. Image-level failures are absorbed by the processor; only
//! bookkeeping failures (the record store, a crashed item task) fail the job.
//!
//! A job whose terminal write never lands (or whose worker died) stays
//! `Processing`; [`JobRunner::recover_stale`] fails such jobs once they have
//! made no progress for long enough.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::job::{BatchJob, JobStatus};
use crate::services::notifier::{NotifyOutcome, Notifier};
use crate::services::processor::ItemProcessor;
use crate::services::store::{RecordStore, StoreError};

const FINISH_ATTEMPTS: u32 = 4;
const FINISH_BACKOFF: Duration = Duration::from_millis(250);

/// Pause applied between consecutive items of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    None,
    FixedDelay(Duration),
}

impl Pacing {
    pub fn from_delay(delay: Duration) -> Self {
        if delay.is_zero() {
            Pacing::None
        } else {
            Pacing::FixedDelay(delay)
        }
    }

    pub async fn pause(&self) {
        if let Pacing::FixedDelay(delay) = self {
            tokio::time::sleep(*delay).await;
        }
    }
}

/// Result of a single [`JobRunner::run`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The job reached this terminal status during the run.
    Finished(JobStatus),
    /// Another runner already claimed the job; nothing was done.
    AlreadyClaimed(JobStatus),
    /// Stale-job recovery failed the job while it was running; no
    /// notification was sent by this run.
    Superseded,
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The job could not be read or claimed; this run changed nothing.
    #[error("Could not start job: {0}")]
    NotStarted(StoreError),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("Item {item_id} processing task failed: {reason}")]
    ItemTask { item_id: Uuid, reason: String },
}

impl RunError {
    /// Whether this run left the job untouched, so delivering it again is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RunError::NotStarted(_))
    }
}

pub struct JobRunner {
    records: Arc<dyn RecordStore>,
    processor: Arc<ItemProcessor>,
    notifier: Arc<dyn Notifier>,
    pacing: Pacing,
}

impl JobRunner {
    pub fn new(
        records: Arc<dyn RecordStore>,
        processor: ItemProcessor,
        notifier: Arc<dyn Notifier>,
        pacing: Pacing,
    ) -> Self {
        Self {
            records,
            processor: Arc::new(processor),
            notifier,
            pacing,
        }
    }

    /// Run a job to completion.
    ///
    /// Returns an error only when the job's state could not be recorded:
    /// failing to claim it, or failing to write its terminal status after
    /// retrying.
    pub async fn run(&self, job_id: Uuid) -> Result<RunOutcome, RunError> {
        let job = self
            .records
            .get_job(job_id)
            .await
            .map_err(RunError::NotStarted)?;
        let Some(job) = job else {
            warn!(job_id = %job_id, "Job not found, nothing to run");
            return Ok(RunOutcome::NotFound);
        };

        let claimed = self
            .records
            .claim_job(job_id, Utc::now())
            .await
            .map_err(RunError::NotStarted)?;
        if !claimed {
            let current = self
                .records
                .get_job(job_id)
                .await
                .map_err(RunError::NotStarted)?
                .map(|j| j.status)
                .unwrap_or(job.status);
            info!(job_id = %job_id, status = %current, "Job already claimed, skipping");
            return Ok(RunOutcome::AlreadyClaimed(current));
        }

        info!(job_id = %job_id, "Processing batch job");
        let start = Instant::now();

        let terminal = match self.process_items(&job).await {
            Ok(count) => {
                info!(job_id = %job_id, items = count, "All items processed");
                JobStatus::Completed
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Job processing interrupted");
                JobStatus::Failed
            }
        };

        if !self.finish(job_id, terminal).await? {
            warn!(job_id = %job_id, "Job was failed by stale-job recovery while running");
            return Ok(RunOutcome::Superseded);
        }

        metrics::histogram!("batch_job_processing_seconds").record(start.elapsed().as_secs_f64());
        match terminal {
            JobStatus::Completed => metrics::counter!("batch_jobs_completed_total").increment(1),
            _ => metrics::counter!("batch_jobs_failed_total").increment(1),
        }
        info!(
            job_id = %job_id,
            status = %terminal,
            duration_ms = start.elapsed().as_millis() as u64,
            "Job finished"
        );

        self.send_notification(job_id, terminal).await;

        Ok(RunOutcome::Finished(terminal))
    }

    /// Fail jobs left in `Processing` with no progress since `before` and
    /// notify each of them once. Returns how many jobs were failed.
    pub async fn recover_stale(&self, before: DateTime<Utc>, limit: i64) -> Result<usize, RunError> {
        let stale = self.records.list_stale_jobs(before, limit).await?;
        let mut recovered = 0;

        for job in stale {
            if !self.records.fail_stale_job(job.id, before, Utc::now()).await? {
                debug!(job_id = %job.id, "Stale job moved on before recovery");
                continue;
            }
            warn!(job_id = %job.id, last_progress = %job.updated_at, "Stale job marked failed");
            metrics::counter!("batch_jobs_failed_total").increment(1);
            self.send_notification(job.id, JobStatus::Failed).await;
            recovered += 1;
        }

        Ok(recovered)
    }

    /// Write the terminal status, retrying store errors with doubling backoff.
    async fn finish(&self, job_id: Uuid, status: JobStatus) -> Result<bool, StoreError> {
        let mut delay = FINISH_BACKOFF;
        let mut attempt = 1;
        loop {
            match self.records.finish_job(job_id, status, Utc::now()).await {
                Ok(finished) => return Ok(finished),
                Err(e) if attempt < FINISH_ATTEMPTS => {
                    warn!(job_id = %job_id, attempt, error = %e, "Terminal status write failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn process_items(&self, job: &BatchJob) -> Result<usize, RunError> {
        let items = self.records.get_items(job.id).await?;
        let mut processed = 0;

        for (position, item) in items.into_iter().enumerate() {
            if item.results.is_some() {
                debug!(job_id = %job.id, item_id = %item.id, "Item already has results, skipping");
                continue;
            }
            if position > 0 {
                self.pacing.pause().await;
            }

            let item_id = item.id;
            let processor = Arc::clone(&self.processor);
            let slots = tokio::spawn(async move { processor.process(&item).await })
                .await
                .map_err(|e| RunError::ItemTask {
                    item_id,
                    reason: e.to_string(),
                })?;

            let failed = slots.iter().filter(|s| s.is_failed()).count();
            self.records
                .update_item_results(item_id, &slots, Utc::now())
                .await?;
            processed += 1;

            debug!(
                job_id = %job.id,
                item_id = %item_id,
                images = slots.len(),
                failed,
                "Item results saved"
            );
        }

        Ok(processed)
    }

    async fn send_notification(&self, job_id: Uuid, status: JobStatus) {
        match self.notifier.notify(job_id, status).await {
            Ok(NotifyOutcome::Delivered) => {
                metrics::counter!("batch_notifications_total", "outcome" => "delivered").increment(1);
                info!(job_id = %job_id, status = %status, "Completion webhook delivered");
            }
            Ok(NotifyOutcome::Skipped) => {
                debug!(job_id = %job_id, "No webhook configured");
            }
            Err(e) => {
                metrics::counter!("batch_notifications_total", "outcome" => "failed").increment(1);
                warn!(job_id = %job_id, error = %e, "Completion webhook failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_delay_disables_pacing() {
        assert_eq!(Pacing::from_delay(Duration::ZERO), Pacing::None);
        assert_eq!(
            Pacing::from_delay(Duration::from_millis(250)),
            Pacing::FixedDelay(Duration::from_millis(250))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_sleeps() {
        let start = tokio::time::Instant::now();
        Pacing::FixedDelay(Duration::from_secs(1)).pause().await;
        assert!(start.elapsed() >= Duration::from_secs(1));
    }
}
