use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{BatchItem, BatchJob, ImageSlot, JobStatus};
use crate::services::store::{RecordStore, StoreError};

pub mod queries;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// [`RecordStore`] backed by the `batch_jobs` / `batch_items` tables.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn create_job(&self, job: &BatchJob, items: &[BatchItem]) -> Result<(), StoreError> {
        Ok(queries::create_job(&self.pool, job, items).await?)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<BatchJob>, StoreError> {
        queries::get_job(&self.pool, job_id).await
    }

    async fn get_items(&self, job_id: Uuid) -> Result<Vec<BatchItem>, StoreError> {
        queries::get_items(&self.pool, job_id).await
    }

    async fn claim_job(&self, job_id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(queries::claim_job(&self.pool, job_id, at).await?)
    }

    async fn finish_job(
        &self,
        job_id: Uuid,
        status: JobStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(queries::finish_job(&self.pool, job_id, status, at).await?)
    }

    async fn update_item_results(
        &self,
        item_id: Uuid,
        results: &[ImageSlot],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Ok(queries::update_item_results(&self.pool, item_id, results, at).await?)
    }

    async fn list_pending_jobs(&self, limit: i64) -> Result<Vec<BatchJob>, StoreError> {
        queries::get_pending_jobs(&self.pool, limit).await
    }

    async fn list_stale_jobs(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BatchJob>, StoreError> {
        queries::get_stale_jobs(&self.pool, before, limit).await
    }

    async fn fail_stale_job(
        &self,
        job_id: Uuid,
        before: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(queries::fail_stale_job(&self.pool, job_id, before, at).await?)
    }
}
