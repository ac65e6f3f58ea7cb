use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::status::JobStatusResponse;
use crate::routes::error::ApiError;
use crate::services::store::{RecordStore, StoreError};

/// Current view of a job and its products.
pub async fn job_status(records: &dyn RecordStore, job_id: Uuid) -> Result<JobStatusResponse, ApiError> {
    let internal = |e: StoreError| {
        tracing::error!(job_id = %job_id, error = %e, "Failed to load job status");
        ApiError::Internal("Error loading request status".to_string())
    };

    let job = records
        .get_job(job_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::NotFound("Request not found".to_string()))?;

    let items = records.get_items(job_id).await.map_err(internal)?;
    if items.is_empty() {
        return Err(ApiError::NotFound("No products found for this request".to_string()));
    }

    Ok(JobStatusResponse::new(&job, &items))
}

/// GET /status/{request_id}: Check batch job status.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    job_status(state.records.as_ref(), job_id).await.map(Json)
}
