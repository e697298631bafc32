//! HTTP fetch step of the evaluation workflow.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::time::{Duration, Instant};

use crate::domain::entities::FetchedPage;

/// Bodies beyond this size are truncated before rendering and scoring.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Transient fetch failures. Each one counts toward the failure streak.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("destination answered with status {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid destination url: {0}")]
    InvalidUrl(String),
}

/// Retrieves a destination page.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Issues a GET and succeeds only on a 2xx answer.
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

/// [`PageFetcher`] backed by a shared `reqwest` client.
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
    max_body_bytes: usize,
}

impl HttpFetcher {
    /// Builds the client with the per-request timeout applied.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("link-router-evaluator/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self {
            client,
            timeout,
            max_body_bytes: MAX_BODY_BYTES,
        })
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    fn classify(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else if e.is_builder() {
            FetchError::InvalidUrl(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let parsed = url::Url::parse(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }

        let started = Instant::now();
        let mut response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        // Read no further than the cap; the rest of the body is never pulled.
        let mut buf: Vec<u8> = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response.chunk().await.map_err(|e| self.classify(e))? {
            let room = self.max_body_bytes - buf.len();
            if chunk.len() >= room {
                buf.extend_from_slice(&chunk[..room]);
                truncated = chunk.len() > room;
                break;
            }
            buf.extend_from_slice(&chunk);
        }
        let latency_ms = started.elapsed().as_millis() as u64;
        let body = String::from_utf8_lossy(&buf).into_owned();

        tracing::debug!(
            url = %final_url,
            status = status.as_u16(),
            bytes = buf.len(),
            truncated,
            latency_ms,
            "Fetched destination"
        );

        Ok(FetchedPage {
            final_url,
            status: status.as_u16(),
            content_type,
            body,
            latency_ms,
        })
    }
}
