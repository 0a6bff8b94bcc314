use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

/// Why a single retrieval failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Worth trying the same URL again: DNS, connect, timeout, 5xx, 429.
    #[error("{url}: {reason}")]
    Transient { url: String, reason: String },
    /// Will not get better by retrying: 404 and friends, bad URL.
    #[error("{url}: {reason}")]
    Definite { url: String, reason: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

/// One network retrieval, no retries.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    /// Bodies larger than this are abandoned.
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, connect_timeout: Duration, max_bytes: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self { client, max_bytes })
    }

    fn too_large(&self, url: &str, size: u64) -> FetchError {
        FetchError::Definite {
            url: url.to_string(),
            reason: format!("body of {} bytes exceeds the {} byte limit", size, self.max_bytes),
        }
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        let mut response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(url, status));
        }

        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(self.too_large(url, len));
            }
        }

        // Content-Length may be absent or wrong; count what actually arrives
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| classify_error(url, &e))? {
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(self.too_large(url, (body.len() + chunk.len()) as u64));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

pub fn classify_status(url: &str, status: StatusCode) -> FetchError {
    let reason = format!("HTTP {}", status);
    let url = url.to_string();
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        FetchError::Transient { url, reason }
    } else {
        FetchError::Definite { url, reason }
    }
}

fn classify_error(url: &str, e: &reqwest::Error) -> FetchError {
    let reason = e.to_string();
    let url = url.to_string();
    if e.is_timeout() || e.is_connect() || e.is_body() || e.is_request() {
        FetchError::Transient { url, reason }
    } else {
        FetchError::Definite { url, reason }
    }
}
