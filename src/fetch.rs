//! Fetching file listings from the binary cache.
//!
//! This module holds the `Fetcher`, which owns the HTTP client used to talk to the binary
//! cache. You should construct a single instance and share it across all outputs you fetch, so
//! that connections are reused.
use std::time::Duration;

use async_trait::async_trait;
use hyper::client::{Client as HyperClient, HttpConnector};
use hyper::{Body, Request, StatusCode};
use tokio_retry::strategy::jitter;
use tokio_retry::RetryIf;

use crate::errors::{Error, ErrorKind, Result};
use crate::listing::{self, ContentEncoding};
use crate::store_path::StorePath;

/// The seam the pipeline fetches listings through. Lets tests drive the pipeline with a fake
/// that fails or succeeds on command, without a real HTTP server.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_listing(&self, store_path: &StorePath) -> Result<Vec<u8>>;
}

/// HTTP statuses that are worth retrying: transient overload or a cache mid-populate.
const RETRYABLE_STATUSES: &[u16] = &[408, 425, 429, 500, 502, 503, 504];

const MAX_ATTEMPTS: usize = 5;
const RETRY_BASE_DELAY_MS: u64 = 200;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches and decompresses `.ls` listings from a Nix binary cache.
pub struct Fetcher {
    client: HyperClient<HttpConnector>,
    cache_url: String,
    request_timeout: Duration,
}

/// Whether a single fetch attempt should be retried.
#[derive(Debug)]
enum AttemptOutcome {
    /// Worth retrying: connection error, timeout, or a retryable HTTP status.
    Retryable(Error),
    /// Not worth retrying: this attempt's error is the final word.
    Terminal(Error),
}

impl Fetcher {
    /// Creates a new fetcher targeting the given binary cache base URL (e.g.
    /// `https://cache.nixos.org`).
    pub fn new(cache_url: String) -> Fetcher {
        Fetcher {
            client: HyperClient::builder().build(HttpConnector::new()),
            cache_url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Overrides the per-request timeout (default 30s).
    pub fn with_request_timeout(mut self, timeout: Duration) -> Fetcher {
        self.request_timeout = timeout;
        self
    }

    /// Fetches and decodes the file listing for a single store path.
    ///
    /// Retries up to 5 times with a linear, jittered backoff on connection errors and on the
    /// HTTP statuses listed in `RETRYABLE_STATUSES`. Any other failure is terminal: the caller
    /// (the fetch stage of the pipeline) is expected to log it and drop this output, not to
    /// fail the whole run.
    pub async fn fetch_listing(&self, store_path: &StorePath) -> Result<Vec<u8>> {
        let url = format!("{}/{}.ls", self.cache_url, store_path.hash());

        // Linear backoff (attempt 1, 2, 3, ... times the base delay) with jitter, matching the
        // retry policy of the external tool this pipeline's design is modeled on.
        let strategy = (1..MAX_ATTEMPTS as u64)
            .map(|n| Duration::from_millis(RETRY_BASE_DELAY_MS * n))
            .map(jitter);

        let url_ref = &url;
        let body = RetryIf::spawn(
            strategy,
            move || self.fetch_once(url_ref),
            |outcome: &AttemptOutcome| matches!(outcome, AttemptOutcome::Retryable(_)),
        )
        .await
        .map_err(|outcome| match outcome {
            AttemptOutcome::Retryable(e) | AttemptOutcome::Terminal(e) => e,
        })?;

        Ok(body)
    }

    async fn fetch_once(&self, url: &str) -> std::result::Result<Vec<u8>, AttemptOutcome> {
        let uri: hyper::Uri = url
            .parse()
            .expect("urls built from a cache_url and a store path hash are always valid");

        let request = Request::get(uri)
            .body(Body::empty())
            .expect("request with an empty body is always valid");

        let response = tokio::time::timeout(self.request_timeout, self.client.request(request))
            .await
            .map_err(|_| AttemptOutcome::Retryable(ErrorKind::FetchFailed(url.to_string()).into()))?
            .map_err(|e| AttemptOutcome::Retryable(Error::from(e)))?;

        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            let err = Error::from(ErrorKind::Http(url.to_string(), code));
            return if RETRYABLE_STATUSES.contains(&code) || status == StatusCode::REQUEST_TIMEOUT {
                Err(AttemptOutcome::Retryable(err))
            } else {
                Err(AttemptOutcome::Terminal(err))
            };
        }

        let encoding = ContentEncoding::from_header(
            response
                .headers()
                .get(hyper::header::CONTENT_ENCODING)
                .and_then(|v| v.to_str().ok()),
        );

        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| AttemptOutcome::Retryable(Error::from(e)))?;

        listing::decompress(&body, encoding)
            .map_err(AttemptOutcome::Terminal)
    }
}

#[async_trait]
impl ListingSource for Fetcher {
    async fn fetch_listing(&self, store_path: &StorePath) -> Result<Vec<u8>> {
        self.fetch_listing(store_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses_match_spec() {
        for code in [408, 425, 429, 500, 502, 503, 504] {
            assert!(RETRYABLE_STATUSES.contains(&code));
        }
        assert!(!RETRYABLE_STATUSES.contains(&404));
    }
}
