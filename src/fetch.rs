//! Page fetching for URL ingestion.
//!
//! The [`Fetcher`] trait is the seam between the refresh policy and the
//! network; tests substitute in-memory fetchers, production uses
//! [`HttpFetcher`] over reqwest.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::IngestError;

/// A fetched page: its body plus the content type the server reported.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub body: String,
    pub content_type: String,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, IngestError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("docent/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, IngestError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IngestError::fetch(url, e.to_string()))?;

        if !response.status().is_success() {
            return Err(IngestError::fetch(
                url,
                format!("HTTP {}", response.status()),
            ));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();

        let body = response
            .text()
            .await
            .map_err(|e| IngestError::fetch(url, e.to_string()))?;

        Ok(FetchedPage { body, content_type })
    }
}
