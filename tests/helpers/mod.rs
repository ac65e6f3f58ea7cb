//! Test helper utilities: in-memory stand-ins for the pipeline's collaborators

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::Url;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use batch_image_processor::models::job::{BatchItem, BatchJob, ImageSlot, JobStatus};
use batch_image_processor::models::status::JobStatusResponse;
use batch_image_processor::services::fetch::{FetchError, ImageSource};
use batch_image_processor::services::notifier::{NotifyError, NotifyOutcome, Notifier};
use batch_image_processor::services::processor::ItemProcessor;
use batch_image_processor::services::runner::{JobRunner, Pacing};
use batch_image_processor::services::storage::{BlobStore, StorageError};
use batch_image_processor::services::store::{RecordStore, StoreError};
use batch_image_processor::services::transformer::Recompressor;

// =============================================================================
// Record store
// =============================================================================

#[derive(Default)]
struct StoreState {
    jobs: HashMap<Uuid, BatchJob>,
    items: Vec<BatchItem>,
    /// Every status written for a job, in order.
    transitions: Vec<(Uuid, JobStatus)>,
    item_writes: usize,
}

/// `RecordStore` kept in memory, with switches to inject failures.
#[derive(Default)]
pub struct InMemoryRecordStore {
    state: Mutex<StoreState>,
    fail_item_writes_after: Mutex<Option<usize>>,
    /// Number of upcoming terminal writes to reject.
    terminal_failures: Mutex<usize>,
    fail_reads: Mutex<bool>,
}

impl InMemoryRecordStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Let `n` item result writes succeed, then fail every later one.
    pub fn fail_item_writes_after(&self, n: usize) {
        *self.fail_item_writes_after.lock().unwrap() = Some(n);
    }

    pub fn fail_terminal_writes(&self) {
        *self.terminal_failures.lock().unwrap() = usize::MAX;
    }

    /// Reject the next `n` terminal writes, then accept again.
    pub fn fail_terminal_writes_times(&self, n: usize) {
        *self.terminal_failures.lock().unwrap() = n;
    }

    pub fn allow_terminal_writes(&self) {
        *self.terminal_failures.lock().unwrap() = 0;
    }

    /// Make job lookups fail until switched back off.
    pub fn fail_reads(&self, failing: bool) {
        *self.fail_reads.lock().unwrap() = failing;
    }

    pub fn job(&self, job_id: Uuid) -> Option<BatchJob> {
        self.state.lock().unwrap().jobs.get(&job_id).cloned()
    }

    pub fn job_count(&self) -> usize {
        self.state.lock().unwrap().jobs.len()
    }

    pub fn items(&self, job_id: Uuid) -> Vec<BatchItem> {
        let state = self.state.lock().unwrap();
        let mut items: Vec<_> = state.items.iter().filter(|i| i.job_id == job_id).cloned().collect();
        items.sort_by_key(|i| i.sequence_number);
        items
    }

    pub fn transitions(&self, job_id: Uuid) -> Vec<JobStatus> {
        self.state
            .lock()
            .unwrap()
            .transitions
            .iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, status)| *status)
            .collect()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create_job(&self, job: &BatchJob, items: &[BatchItem]) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.jobs.insert(job.id, job.clone());
        state.items.extend(items.iter().cloned());
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<BatchJob>, StoreError> {
        if *self.fail_reads.lock().unwrap() {
            return Err(StoreError::Unavailable("read rejected".to_string()));
        }
        Ok(self.job(job_id))
    }

    async fn get_items(&self, job_id: Uuid) -> Result<Vec<BatchItem>, StoreError> {
        Ok(self.items(job_id))
    }

    async fn claim_job(&self, job_id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        let claimed = match state.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Processing;
                job.updated_at = at;
                true
            }
            _ => false,
        };
        if claimed {
            state.transitions.push((job_id, JobStatus::Processing));
        }
        Ok(claimed)
    }

    async fn finish_job(
        &self,
        job_id: Uuid,
        status: JobStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        {
            let mut failures = self.terminal_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(StoreError::Unavailable("terminal write rejected".to_string()));
            }
        }
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::Corrupt(format!("no job {}", job_id)))?;
        if job.status != JobStatus::Processing {
            return Ok(false);
        }
        job.status = status;
        job.updated_at = at;
        state.transitions.push((job_id, status));
        Ok(true)
    }

    async fn update_item_results(
        &self,
        item_id: Uuid,
        results: &[ImageSlot],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(limit) = *self.fail_item_writes_after.lock().unwrap() {
            if state.item_writes >= limit {
                return Err(StoreError::Unavailable("item write rejected".to_string()));
            }
        }
        let item = state
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| StoreError::Corrupt(format!("no item {}", item_id)))?;
        item.results = Some(results.to_vec());
        let job_id = item.job_id;
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.updated_at = at;
        }
        state.item_writes += 1;
        Ok(())
    }

    async fn list_pending_jobs(&self, limit: i64) -> Result<Vec<BatchJob>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut pending: Vec<_> = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|j| j.created_at);
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn list_stale_jobs(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BatchJob>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut stale: Vec<_> = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Processing && j.updated_at < before)
            .cloned()
            .collect();
        stale.sort_by_key(|j| j.updated_at);
        stale.truncate(limit as usize);
        Ok(stale)
    }

    async fn fail_stale_job(
        &self,
        job_id: Uuid,
        before: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        let failed = match state.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Processing && job.updated_at < before => {
                job.status = JobStatus::Failed;
                job.updated_at = at;
                true
            }
            _ => false,
        };
        if failed {
            state.transitions.push((job_id, JobStatus::Failed));
        }
        Ok(failed)
    }
}

// =============================================================================
// Image source
// =============================================================================

/// Serves canned bodies by URL; unknown URLs answer 404.
#[derive(Default)]
pub struct FakeImageSource {
    responses: HashMap<String, Result<Vec<u8>, u16>>,
    calls: Mutex<Vec<String>>,
}

impl FakeImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.responses.insert(url.to_string(), Ok(bytes));
        self
    }

    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.responses.insert(url.to_string(), Err(status));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageSource for FakeImageSource {
    async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        match self.responses.get(url.as_str()) {
            Some(Ok(bytes)) => Ok(Bytes::from(bytes.clone())),
            Some(Err(status)) => Err(FetchError::Status(*status)),
            None => Err(FetchError::Status(404)),
        }
    }
}

/// Panics on every fetch, standing in for a crashing item task.
pub struct PanickingImageSource;

#[async_trait]
impl ImageSource for PanickingImageSource {
    async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError> {
        panic!("source exploded while fetching {}", url);
    }
}

// =============================================================================
// Blob store
// =============================================================================

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<Vec<(String, Vec<u8>)>>,
    failing: bool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn get(&self, url: &str) -> Option<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .iter()
            .find(|(u, _)| u == url)
            .map(|(_, bytes)| bytes.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        data: &[u8],
        extension: &str,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        if self.failing {
            return Err(StorageError::Config("blob store offline".to_string()));
        }
        let mut blobs = self.blobs.lock().unwrap();
        let url = format!("memory://blobs/{}.{}", blobs.len(), extension);
        blobs.push((url.clone(), data.to_vec()));
        Ok(url)
    }
}

// =============================================================================
// Notifier
// =============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<(Uuid, JobStatus)>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(Uuid, JobStatus)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, job_id: Uuid, status: JobStatus) -> Result<NotifyOutcome, NotifyError> {
        self.calls.lock().unwrap().push((job_id, status));
        if self.failing {
            Err(NotifyError::Status(500))
        } else {
            Ok(NotifyOutcome::Delivered)
        }
    }
}

// =============================================================================
// Wiring
// =============================================================================

/// A runner over the given collaborators with pacing disabled.
pub fn build_runner(
    records: Arc<InMemoryRecordStore>,
    source: Arc<dyn ImageSource>,
    blobs: Arc<dyn BlobStore>,
    notifier: Arc<dyn Notifier>,
) -> JobRunner {
    build_paced_runner(records, source, blobs, notifier, Pacing::None)
}

pub fn build_paced_runner(
    records: Arc<InMemoryRecordStore>,
    source: Arc<dyn ImageSource>,
    blobs: Arc<dyn BlobStore>,
    notifier: Arc<dyn Notifier>,
    pacing: Pacing,
) -> JobRunner {
    let processor = ItemProcessor::new(source, blobs, Recompressor::default());
    JobRunner::new(records, processor, notifier, pacing)
}

// =============================================================================
// HTTP helpers for tests against a running deployment
// =============================================================================

/// Upload a manifest to POST /upload and return the request id.
pub async fn upload_manifest(
    client: &reqwest::Client,
    base_url: &str,
    csv: &str,
    webhook_url: Option<&str>,
) -> Result<Uuid, Box<dyn std::error::Error>> {
    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(csv.as_bytes().to_vec())
            .file_name("products.csv")
            .mime_str("text/csv")?,
    );

    let mut request = client.post(format!("{}/upload", base_url)).multipart(form);
    if let Some(hook) = webhook_url {
        request = request.query(&[("webhook_url", hook)]);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Upload failed with status {}: {}", status, error_text).into());
    }

    let body: serde_json::Value = response.json().await?;
    let request_id = body["request_id"].as_str().ok_or("missing request_id")?;
    Ok(request_id.parse()?)
}

/// Poll GET /status/{id} until the job is terminal (with timeout)
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    request_id: Uuid,
    timeout_secs: u64,
) -> Result<JobStatusResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for _ in 0..max_attempts {
        let response = client
            .get(format!("{}/status/{}", base_url, request_id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let status_response = response.json::<JobStatusResponse>().await?;
        if status_response.status.is_terminal() {
            return Ok(status_response);
        }
        sleep(Duration::from_millis(500)).await;
    }

    Err(format!("Job did not finish within {} seconds", timeout_secs).into())
}
