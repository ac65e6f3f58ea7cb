use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::job::{BatchItem, BatchJob, ImageSlot, JobStatus};

/// Durable storage for jobs and their items.
///
/// `create_job` must persist the job and every item atomically; the runner
/// never observes a job whose item set is incomplete.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_job(&self, job: &BatchJob, items: &[BatchItem]) -> Result<(), StoreError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<BatchJob>, StoreError>;

    /// Items of a job ordered by sequence number.
    async fn get_items(&self, job_id: Uuid) -> Result<Vec<BatchItem>, StoreError>;

    /// Atomically move a `Pending` job to `Processing`.
    ///
    /// Returns `false` when the job is missing or was already claimed.
    async fn claim_job(&self, job_id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Move a `Processing` job to a terminal status.
    ///
    /// Returns `false` when the job is no longer `Processing`, e.g. because
    /// stale-job recovery already failed it.
    async fn finish_job(
        &self,
        job_id: Uuid,
        status: JobStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Store an item's results and refresh its job's `updated_at`.
    ///
    /// The refreshed timestamp is the heartbeat stale-job recovery reads.
    async fn update_item_results(
        &self,
        item_id: Uuid,
        results: &[ImageSlot],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Oldest jobs still waiting to be picked up.
    async fn list_pending_jobs(&self, limit: i64) -> Result<Vec<BatchJob>, StoreError>;

    /// Jobs left in `Processing` with no progress since `before`.
    async fn list_stale_jobs(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BatchJob>, StoreError>;

    /// Fail a job that is still `Processing` with no progress since `before`.
    ///
    /// Returns `false` when the job finished or made progress in the meantime.
    async fn fail_stale_job(
        &self,
        job_id: Uuid,
        before: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid stored value: {0}")]
    Corrupt(String),

    #[error("Record store unavailable: {0}")]
    Unavailable(String),
}
