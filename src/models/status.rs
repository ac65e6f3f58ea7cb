use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{BatchItem, BatchJob, JobStatus};

/// Query parameters accepted by the upload endpoint.
#[derive(Debug, Deserialize, Validate)]
pub struct UploadParams {
    #[garde(url)]
    pub webhook_url: Option<String>,
}

/// Response after accepting a manifest.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub request_id: Uuid,
}

/// Response for querying job status.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub request_id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub products: Vec<ProductStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProductStatus {
    pub serial_number: i32,
    pub product_name: String,
    pub input_image_urls: Vec<String>,
    pub output_image_urls: Vec<String>,
}

impl JobStatusResponse {
    pub fn new(job: &BatchJob, items: &[BatchItem]) -> Self {
        Self {
            request_id: job.id,
            status: job.status,
            created_at: job.created_at,
            updated_at: job.updated_at,
            products: items.iter().map(ProductStatus::from).collect(),
        }
    }
}

impl From<&BatchItem> for ProductStatus {
    fn from(item: &BatchItem) -> Self {
        Self {
            serial_number: item.sequence_number,
            product_name: item.product_name.clone(),
            input_image_urls: item.source_urls.clone(),
            output_image_urls: item
                .results
                .as_ref()
                .map(|slots| slots.iter().map(|s| s.as_wire().to_string()).collect())
                .unwrap_or_default(),
        }
    }
}

/// Body POSTed to a job's webhook when it reaches a terminal state.
#[derive(Debug, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub request_id: Uuid,
    pub status: JobStatus,
    pub timestamp: String,
}
