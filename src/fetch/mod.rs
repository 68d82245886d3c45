pub mod credentials;

pub use credentials::{CredentialSource, RedisCredentialSource};

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::error::FetchError;

/// Acquires an authenticated HTML document for a URL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// reqwest-backed fetcher with a hard per-fetch deadline; cookies come from
/// the rotating credential source, one draw per fetch.
pub struct HttpPageFetcher {
    client: reqwest::Client,
    credentials: Arc<dyn CredentialSource>,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration, credentials: Arc<dyn CredentialSource>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            credentials,
        })
    }
}

fn classify(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(url.to_string())
    } else {
        FetchError::Transport {
            url: url.to_string(),
            source: err,
        }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let mut request = self.client.get(url);
        if let Some(cookie) = self.credentials.cookie_header().await? {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let response = request.send().await.map_err(|e| classify(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(|e| classify(url, e))
    }
}
