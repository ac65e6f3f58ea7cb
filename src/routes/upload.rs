use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::job::{BatchItem, BatchJob, NewItem};
use crate::models::status::{UploadParams, UploadResponse};
use crate::routes::error::ApiError;
use crate::services::manifest;
use crate::services::queue::QueuedJob;
use crate::services::store::{RecordStore, StoreError};

/// Persist a new job together with all of its items.
pub async fn create_batch(
    records: &dyn RecordStore,
    webhook_url: Option<String>,
    new_items: Vec<NewItem>,
) -> Result<BatchJob, StoreError> {
    let job = BatchJob::new(webhook_url);
    let items: Vec<BatchItem> = new_items.into_iter().map(|i| i.into_item(job.id)).collect();
    records.create_job(&job, &items).await?;
    Ok(job)
}

/// POST /upload: Accept a CSV manifest and queue it for processing.
pub async fn upload_manifest(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    params
        .validate()
        .map_err(|e| ApiError::BadRequest(format!("Invalid webhook_url: {}", e)))?;

    let mut manifest_data = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let is_csv = field.file_name().is_some_and(|name| name.ends_with(".csv"));
        if !is_csv {
            return Err(ApiError::BadRequest("Only CSV files are allowed".to_string()));
        }
        manifest_data = Some(
            field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        );
    }

    let data = manifest_data.ok_or_else(|| ApiError::BadRequest("Missing 'file' field".to_string()))?;
    let new_items = manifest::parse_manifest(&data)?;
    let item_count = new_items.len();

    let job = create_batch(state.records.as_ref(), params.webhook_url, new_items)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to store batch job");
            ApiError::Internal("Failed to store batch job".to_string())
        })?;

    metrics::counter!("batch_jobs_submitted_total").increment(1);
    tracing::info!(job_id = %job.id, items = item_count, "Batch job created");

    if let Err(e) = state.queue.enqueue(&QueuedJob { job_id: job.id }).await {
        // Job stays pending; the worker re-enqueues pending jobs on startup.
        tracing::error!(job_id = %job.id, error = %e, "Failed to enqueue batch job");
        return Err(ApiError::Unavailable(format!(
            "Job {} was stored but could not be queued",
            job.id
        )));
    }

    Ok((StatusCode::ACCEPTED, Json(UploadResponse { request_id: job.id })))
}
