use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::{Client, Url};
use std::time::Duration;

/// Source of original product images.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError>;
}

/// Parse a manifest reference into a URL the fetcher can retrieve.
///
/// Only absolute `http`/`https` URLs with a host are accepted.
pub fn parse_source_url(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw.trim()).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(FetchError::InvalidUrl(raw.to_string())),
    }
}

/// Downloads source images over HTTP, refusing bodies over `max_bytes`.
pub struct HttpImageSource {
    http: Client,
    max_bytes: usize,
}

impl HttpImageSource {
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(concat!("batch-image-processor/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self { http, max_bytes })
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError> {
        let mut response = self.http.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let too_large = FetchError::TooLarge { limit: self.max_bytes };
        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(too_large);
        }

        // Content-Length may be absent or wrong; enforce the cap while streaming.
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(too_large);
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body.freeze())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Not a fetchable image URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Source responded with status {0}")]
    Status(u16),

    #[error("Source image exceeds {limit} bytes")]
    TooLarge { limit: usize },
}
