use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{normalize_url_base, AppConfig, BlobBackend};

/// Durable storage for processed images.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under a freshly generated name and return its public URL.
    async fn put(&self, data: &[u8], extension: &str, content_type: &str)
        -> Result<String, StorageError>;
}

fn object_name(extension: &str) -> String {
    format!("{}.{}", Uuid::new_v4(), extension)
}

/// Build the blob store selected by configuration.
pub async fn from_config(config: &AppConfig) -> Result<Arc<dyn BlobStore>, StorageError> {
    match config.blob_backend {
        BlobBackend::Local => {
            let store = LocalBlobStore::new(&config.processed_dir, &config.processed_url_base);
            store.ensure_dir().await?;
            Ok(Arc::new(store))
        }
        BlobBackend::R2 => {
            let required = |value: &Option<String>, name: &str| {
                value
                    .clone()
                    .ok_or_else(|| StorageError::Config(format!("{} must be set for the r2 backend", name)))
            };
            let store = R2Client::new(
                &required(&config.r2_bucket, "R2_BUCKET")?,
                &required(&config.r2_endpoint, "R2_ENDPOINT")?,
                &required(&config.r2_access_key, "R2_ACCESS_KEY")?,
                &required(&config.r2_secret_key, "R2_SECRET_KEY")?,
                &required(&config.r2_public_url, "R2_PUBLIC_URL")?,
            )?;
            Ok(Arc::new(store))
        }
    }
}

/// Writes processed images to a directory served under a public URL prefix.
pub struct LocalBlobStore {
    dir: PathBuf,
    url_base: String,
}

impl LocalBlobStore {
    pub fn new(dir: impl Into<PathBuf>, url_base: &str) -> Self {
        Self {
            dir: dir.into(),
            url_base: normalize_url_base(url_base),
        }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Create the target directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(
        &self,
        data: &[u8],
        extension: &str,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let name = object_name(extension);
        tokio::fs::write(self.dir.join(&name), data).await?;
        Ok(format!("{}{}", self.url_base, name))
    }
}

/// Client for Cloudflare R2 object storage (S3-compatible).
pub struct R2Client {
    bucket: Box<Bucket>,
    public_url: String,
}

const R2_PREFIX: &str = "processed/";

impl R2Client {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        public_url: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            bucket,
            public_url: normalize_url_base(public_url),
        })
    }
}

#[async_trait]
impl BlobStore for R2Client {
    async fn put(
        &self,
        data: &[u8],
        extension: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let key = format!("{}{}", R2_PREFIX, object_name(extension));
        let response = self
            .bucket
            .put_object_with_content_type(&key, data, content_type)
            .await
            .map_err(StorageError::S3)?;

        if response.status_code() >= 300 {
            return Err(StorageError::Rejected(response.status_code()));
        }

        Ok(format!("{}{}", self.public_url, key))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Object store rejected upload with status {0}")]
    Rejected(u16),

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
