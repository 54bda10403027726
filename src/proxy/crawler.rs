//! Candidate aggregation from proxy list sources
//!
//! This module provides functionality for:
//! - Fetching raw text from each configured source URL
//! - Skipping sources that fail without aborting the rest
//! - Merging every source's lines into one deduplicated candidate set

use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of sources fetched at once
const DEFAULT_CONCURRENCY: usize = 8;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Why one source produced nothing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceFetchError {
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The HTTP client itself is unusable; no source can succeed this pass
    #[error("HTTP client unusable: {0}")]
    Client(String),
}

impl SourceFetchError {
    /// Whether this failure invalidates the whole aggregation pass
    pub fn aborts_aggregation(&self) -> bool {
        matches!(self, SourceFetchError::Client(_))
    }
}

/// Returns the raw body of one source URL
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<String, SourceFetchError>;
}

/// Configuration for source fetching
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Timeout for HTTP requests
    pub timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
    /// Sources fetched at once
    pub concurrency: usize,
    /// Retry policy for a whole aggregation pass
    pub retry: RetryPolicy,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::aggregation(),
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// `SourceFetcher` over plain HTTP GETs
#[derive(Debug, Clone)]
pub struct HttpSourceFetcher {
    timeout: Duration,
    user_agent: String,
}

impl HttpSourceFetcher {
    pub fn new(config: &CrawlerConfig) -> Self {
        Self {
            timeout: config.timeout,
            user_agent: config.user_agent.clone(),
        }
    }

    fn create_client(&self) -> std::result::Result<Client, SourceFetchError> {
        Client::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .build()
            .map_err(|e| SourceFetchError::Client(e.to_string()))
    }
}

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<String, SourceFetchError> {
        let client = self.create_client()?;
        let response = client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                SourceFetchError::Timeout(self.timeout)
            } else {
                SourceFetchError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(SourceFetchError::Status(status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| SourceFetchError::Network(e.to_string()))
    }
}

/// Split a source body into candidate strings, dropping blank lines
pub fn split_candidates(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
}

/// Merges candidates from many sources into one deduplicated set
pub struct SourceAggregator {
    fetcher: Arc<dyn SourceFetcher>,
    config: CrawlerConfig,
}

impl SourceAggregator {
    pub fn new(fetcher: Arc<dyn SourceFetcher>, config: CrawlerConfig) -> Self {
        Self { fetcher, config }
    }

    /// Aggregator fetching over HTTP with the given configuration
    pub fn http(config: CrawlerConfig) -> Self {
        Self::new(Arc::new(HttpSourceFetcher::new(&config)), config)
    }

    /// Fetch every source and union their lines.
    ///
    /// Individual source failures are logged and skipped. Only an
    /// aggregation-level failure retries the whole pass, and surfaces as
    /// `Error::Aggregation` once the retry policy is exhausted.
    pub async fn fetch_candidates(&self, sources: &[String]) -> Result<HashSet<String>> {
        retry_with_backoff(
            &self.config.retry,
            "candidate aggregation",
            || self.aggregate_once(sources),
            |e: &Error| matches!(e, Error::Aggregation(_)),
        )
        .await
    }

    async fn aggregate_once(&self, sources: &[String]) -> Result<HashSet<String>> {
        let fetcher = Arc::clone(&self.fetcher);
        let results = stream::iter(sources.to_vec())
            .map(move |url| {
                let fetcher = Arc::clone(&fetcher);
                async move {
                    let result = fetcher.fetch(&url).await;
                    (url, result)
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut candidates = HashSet::new();
        for (url, result) in results {
            match result {
                Ok(text) => {
                    let lines: Vec<String> = split_candidates(&text).collect();
                    info!("Fetched {} candidates from {}", lines.len(), url);
                    candidates.extend(lines);
                }
                Err(e) if e.aborts_aggregation() => {
                    return Err(Error::Aggregation(format!("{}: {}", url, e)));
                }
                Err(e) => warn!("Failed to fetch candidates from {}: {}", url, e),
            }
        }

        info!(
            "Aggregated {} unique candidates from {} sources",
            candidates.len(),
            sources.len()
        );
        Ok(candidates)
    }
}
