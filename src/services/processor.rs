use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::job::{BatchItem, ImageSlot};
use crate::services::fetch::{parse_source_url, FetchError, ImageSource};
use crate::services::storage::{BlobStore, StorageError};
use crate::services::transformer::{Recompressor, TransformError};

/// Why a single image slot ended up failed.
#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("Image transform task aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Store(#[from] StorageError),
}

impl SlotError {
    /// Pipeline stage the error came from (metrics label).
    pub fn stage(&self) -> &'static str {
        match self {
            SlotError::Fetch(FetchError::InvalidUrl(_)) => "validate",
            SlotError::Fetch(_) => "fetch",
            SlotError::Transform(_) | SlotError::Aborted(_) => "transform",
            SlotError::Store(_) => "store",
        }
    }
}

/// Turns an item's source URLs into processed image URLs.
///
/// A failing image never affects its siblings: every source position yields
/// exactly one slot, in order.
pub struct ItemProcessor {
    source: Arc<dyn ImageSource>,
    blobs: Arc<dyn BlobStore>,
    recompressor: Recompressor,
}

impl ItemProcessor {
    pub fn new(
        source: Arc<dyn ImageSource>,
        blobs: Arc<dyn BlobStore>,
        recompressor: Recompressor,
    ) -> Self {
        Self {
            source,
            blobs,
            recompressor,
        }
    }

    pub async fn process(&self, item: &BatchItem) -> Vec<ImageSlot> {
        let mut slots = Vec::with_capacity(item.source_urls.len());

        for (index, raw_url) in item.source_urls.iter().enumerate() {
            match self.process_image(raw_url).await {
                Ok(url) => {
                    debug!(item_id = %item.id, index, source = %raw_url, output = %url, "Image processed");
                    metrics::counter!("batch_images_processed_total").increment(1);
                    slots.push(ImageSlot::Processed(url));
                }
                Err(e) => {
                    warn!(
                        item_id = %item.id,
                        index,
                        source = %raw_url,
                        stage = e.stage(),
                        error = %e,
                        "Image processing failed"
                    );
                    metrics::counter!("batch_images_failed_total", "stage" => e.stage()).increment(1);
                    slots.push(ImageSlot::Failed);
                }
            }
        }

        slots
    }

    async fn process_image(&self, raw_url: &str) -> Result<String, SlotError> {
        let url = parse_source_url(raw_url)?;
        let source_bytes = self.source.fetch(&url).await?;

        let recompressor = self.recompressor;
        let transformed = tokio::task::spawn_blocking(move || recompressor.transform(&source_bytes))
            .await
            .map_err(|e| SlotError::Aborted(e.to_string()))??;

        let url = self
            .blobs
            .put(&transformed.bytes, transformed.extension(), transformed.content_type())
            .await?;

        Ok(url)
    }
}
