use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    /// Files written under `processed_dir` and served by the API.
    Local,
    /// Cloudflare R2 (S3-compatible) bucket.
    R2,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for job queue
    pub redis_url: String,

    /// Where processed images are stored
    #[serde(default = "default_blob_backend")]
    pub blob_backend: BlobBackend,

    /// Local directory for processed images (local backend)
    #[serde(default = "default_processed_dir")]
    pub processed_dir: String,

    /// Public URL prefix under which `processed_dir` is served (local backend)
    #[serde(default = "default_processed_url_base")]
    pub processed_url_base: String,

    /// R2 bucket name
    pub r2_bucket: Option<String>,

    /// R2 endpoint URL
    pub r2_endpoint: Option<String>,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: Option<String>,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: Option<String>,

    /// Public URL prefix for objects in the R2 bucket
    pub r2_public_url: Option<String>,

    /// Re-encode quality, 1-100
    #[serde(default = "default_image_quality")]
    pub image_quality: u8,

    /// Pause between items of a job; 0 disables pacing
    #[serde(default = "default_item_delay_ms")]
    pub item_delay_ms: u64,

    /// Number of jobs a worker process runs concurrently
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,

    /// Largest source image the worker will download, in bytes
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    /// A processing job with no progress for this long is failed by recovery
    #[serde(default = "default_stale_job_secs")]
    pub stale_job_secs: u64,

    /// Maximum manifest upload size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Prometheus listener for the worker process (e.g., "0.0.0.0:9100")
    pub metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_blob_backend() -> BlobBackend {
    BlobBackend::Local
}

fn default_processed_dir() -> String {
    "processed".to_string()
}

fn default_processed_url_base() -> String {
    "http://localhost:8000/processed/".to_string()
}

fn default_image_quality() -> u8 {
    50
}

fn default_item_delay_ms() -> u64 {
    1000
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

fn default_max_image_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_stale_job_secs() -> u64 {
    1800
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

/// Append a trailing slash so file names can be joined directly.
pub fn normalize_url_base(base: &str) -> String {
    if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{}/", base)
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env::<AppConfig>().map(Self::normalized)
    }

    fn normalized(mut self) -> Self {
        self.processed_url_base = normalize_url_base(&self.processed_url_base);
        self.r2_public_url = self.r2_public_url.as_deref().map(normalize_url_base);
        self.image_quality = self.image_quality.clamp(1, 100);
        self.worker_concurrency = self.worker_concurrency.max(1);
        self.stale_job_secs = self.stale_job_secs.max(60);
        self
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_job_secs)
    }
}
