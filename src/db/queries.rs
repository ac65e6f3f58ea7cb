use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::job::{BatchItem, BatchJob, ImageSlot, JobStatus};
use crate::services::store::StoreError;

fn job_from_row(row: &PgRow) -> Result<BatchJob, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str)
        .map_err(|_| StoreError::Corrupt(format!("unknown job status '{}'", status_str)))?;

    Ok(BatchJob {
        id: row.try_get("id")?,
        status,
        webhook_url: row.try_get("webhook_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<BatchItem, StoreError> {
    let results: Option<Vec<String>> = row.try_get("result_urls")?;

    Ok(BatchItem {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        sequence_number: row.try_get("sequence_number")?,
        product_name: row.try_get("product_name")?,
        source_urls: row.try_get("source_urls")?,
        results: results.map(|urls| urls.iter().map(|u| ImageSlot::from_wire(u)).collect()),
    })
}

/// Insert a job and all of its items in one transaction
pub async fn create_job(
    pool: &PgPool,
    job: &BatchJob,
    items: &[BatchItem],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO batch_jobs (id, status, webhook_url, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(job.id)
    .bind(job.status.to_string())
    .bind(job.webhook_url.as_deref())
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(&mut *tx)
    .await?;

    for item in items {
        sqlx::query(
            r#"
            INSERT INTO batch_items (id, job_id, sequence_number, product_name, source_urls)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(item.id)
        .bind(job.id)
        .bind(item.sequence_number)
        .bind(&item.product_name)
        .bind(&item.source_urls)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<BatchJob>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, status, webhook_url, created_at, updated_at
        FROM batch_jobs
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Get the items of a job in submission order
pub async fn get_items(pool: &PgPool, job_id: Uuid) -> Result<Vec<BatchItem>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT id, job_id, sequence_number, product_name, source_urls, result_urls
        FROM batch_items
        WHERE job_id = $1
        ORDER BY sequence_number ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(item_from_row).collect()
}

/// Claim a pending job for processing
pub async fn claim_job(
    pool: &PgPool,
    job_id: Uuid,
    at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE batch_jobs
        SET status = 'processing',
            updated_at = $2
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(job_id)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Move a processing job to its terminal status
pub async fn finish_job(
    pool: &PgPool,
    job_id: Uuid,
    status: JobStatus,
    at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE batch_jobs
        SET status = $1,
            updated_at = $2
        WHERE id = $3 AND status = 'processing'
        "#,
    )
    .bind(status.to_string())
    .bind(at)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Store the processed URLs of one item and bump its job's `updated_at`
pub async fn update_item_results(
    pool: &PgPool,
    item_id: Uuid,
    results: &[ImageSlot],
    at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let urls: Vec<String> = results.iter().map(|slot| slot.as_wire().to_string()).collect();

    sqlx::query(
        r#"
        WITH item AS (
            UPDATE batch_items
            SET result_urls = $1
            WHERE id = $2
            RETURNING job_id
        )
        UPDATE batch_jobs
        SET updated_at = $3
        FROM item
        WHERE batch_jobs.id = item.job_id
        "#,
    )
    .bind(&urls)
    .bind(item_id)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get pending jobs (for queue recovery)
pub async fn get_pending_jobs(pool: &PgPool, limit: i64) -> Result<Vec<BatchJob>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT id, status, webhook_url, created_at, updated_at
        FROM batch_jobs
        WHERE status = 'pending'
        ORDER BY created_at ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Get processing jobs with no progress since `before` (for stale-job recovery)
pub async fn get_stale_jobs(
    pool: &PgPool,
    before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<BatchJob>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT id, status, webhook_url, created_at, updated_at
        FROM batch_jobs
        WHERE status = 'processing' AND updated_at < $1
        ORDER BY updated_at ASC
        LIMIT $2
        "#,
    )
    .bind(before)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Fail a stale processing job, unless it moved on since it was listed
pub async fn fail_stale_job(
    pool: &PgPool,
    job_id: Uuid,
    before: DateTime<Utc>,
    at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE batch_jobs
        SET status = 'failed',
            updated_at = $3
        WHERE id = $1 AND status = 'processing' AND updated_at < $2
        "#,
    )
    .bind(job_id)
    .bind(before)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}
