use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::JobStatus;
use crate::models::status::CompletionEvent;
use crate::services::store::{RecordStore, StoreError};

/// What happened to a completion notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// The job has no webhook configured.
    Skipped,
    Delivered,
}

/// Best-effort delivery of job completion events.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, job_id: Uuid, status: JobStatus) -> Result<NotifyOutcome, NotifyError>;
}

/// POSTs a [`CompletionEvent`] to the job's webhook URL.
pub struct WebhookNotifier {
    http: Client,
    records: Arc<dyn RecordStore>,
}

impl WebhookNotifier {
    pub fn new(records: Arc<dyn RecordStore>, timeout: Duration) -> Result<Self, NotifyError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, records })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, job_id: Uuid, status: JobStatus) -> Result<NotifyOutcome, NotifyError> {
        let webhook_url = match self.records.get_job(job_id).await? {
            Some(job) => job.webhook_url,
            None => None,
        };
        let Some(webhook_url) = webhook_url else {
            return Ok(NotifyOutcome::Skipped);
        };

        let event = CompletionEvent {
            request_id: job_id,
            status,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };

        let response = self.http.post(&webhook_url).json(&event).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }

        Ok(NotifyOutcome::Delivered)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to look up webhook: {0}")]
    Lookup(#[from] StoreError),

    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook responded with status {0}")]
    Status(u16),
}
