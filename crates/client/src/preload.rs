//! Image preloading ahead of an avatar swap.
//!
//! A final avatar URL is only committed once the image has been fetched (or
//! failed to), so the display never swaps to an image that is still loading.

use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that can occur while preloading an image.
#[derive(Debug, Clone, Error)]
pub enum PreloadError {
    /// Request failed before a response arrived.
    #[error("image request failed: {0}")]
    Request(String),

    /// The server answered with a non-success status.
    #[error("image request returned status {0}")]
    Status(u16),

    /// The response is not an image.
    #[error("not an image: {0}")]
    NotAnImage(String),

    /// Loading took longer than allowed.
    #[error("image preload timeout after {0}ms")]
    Timeout(u64),
}

/// Loads an image so a later display of the same URL is immediate.
#[async_trait::async_trait]
pub trait ImageLoader: Send + Sync {
    async fn preload(&self, url: &str) -> Result<(), PreloadError>;
}

/// Preloader that fetches the image over HTTP and checks its content type.
#[derive(Debug, Clone)]
pub struct HttpImageLoader {
    http: reqwest::Client,
}

impl HttpImageLoader {
    pub fn new(timeout: Duration) -> Result<Self, PreloadError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PreloadError::Request(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait::async_trait]
impl ImageLoader for HttpImageLoader {
    async fn preload(&self, url: &str) -> Result<(), PreloadError> {
        let start = Instant::now();
        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "image/*")
            .send()
            .await
            .map_err(|e| PreloadError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PreloadError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("image/") {
            return Err(PreloadError::NotAnImage(content_type));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PreloadError::Request(e.to_string()))?;

        tracing::debug!(url, bytes = bytes.len(), elapsed_ms = start.elapsed().as_millis() as u64, "image preloaded");
        Ok(())
    }
}

/// Preload with an upper bound on the wait.
pub async fn preload_with_timeout(loader: &dyn ImageLoader, url: &str, limit: Duration) -> Result<(), PreloadError> {
    match tokio::time::timeout(limit, loader.preload(url)).await {
        Ok(result) => result,
        Err(_) => Err(PreloadError::Timeout(limit.as_millis() as u64)),
    }
}
