use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle status of a batch job.
///
/// Serialized upper-case on the wire (`"COMPLETED"`), stored lower-case in
/// the database (`"completed"`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// `Completed` and `Failed` admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A submitted batch of products.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub webhook_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BatchJob {
    pub fn new(webhook_url: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            webhook_url,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Outcome for one source image slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSlot {
    Processed(String),
    Failed,
}

impl ImageSlot {
    /// Failed slots are represented by an empty string so they keep their
    /// position next to the matching input URL.
    pub fn as_wire(&self) -> &str {
        match self {
            ImageSlot::Processed(url) => url,
            ImageSlot::Failed => "",
        }
    }

    pub fn from_wire(value: &str) -> Self {
        if value.is_empty() {
            ImageSlot::Failed
        } else {
            ImageSlot::Processed(value.to_string())
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ImageSlot::Failed)
    }
}

/// One product row belonging to a batch job.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub id: Uuid,
    pub job_id: Uuid,
    pub sequence_number: i32,
    pub product_name: String,
    pub source_urls: Vec<String>,
    /// `None` until the item has been processed.
    pub results: Option<Vec<ImageSlot>>,
}

/// Item data supplied at submission time, before the job exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub sequence_number: i32,
    pub product_name: String,
    pub source_urls: Vec<String>,
}

impl NewItem {
    pub fn into_item(self, job_id: Uuid) -> BatchItem {
        BatchItem {
            id: Uuid::new_v4(),
            job_id,
            sequence_number: self.sequence_number,
            product_name: self.product_name,
            source_urls: self.source_urls,
            results: None,
        }
    }
}
