//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the archiver, including:
//! - Building HTTP clients with the configured user agent
//! - GET requests with a streamed, size-limited body
//! - Manual redirect handling with loop detection
//! - Error classification into failure reasons
//! - Retry with exponential backoff for transient failures

use crate::config::CrawlConfig;
use crate::crawler::politeness::Politeness;
use crate::state::FailureReason;
use async_trait::async_trait;
use reqwest::{header, redirect::Policy, Client, StatusCode};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// A successfully retrieved page or resource
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Raw body bytes
    pub bytes: Vec<u8>,

    /// Content-Type header value
    pub content_type: Option<String>,

    /// Final URL after redirects
    pub final_url: Url,

    /// HTTP status code of the final response
    pub status: u16,
}

impl FetchResult {
    /// Returns true if the body is an HTML document
    pub fn is_html(&self) -> bool {
        match &self.content_type {
            Some(ct) => {
                let ct = ct.to_ascii_lowercase();
                ct.contains("text/html") || ct.contains("application/xhtml+xml")
            }
            // Sniff untyped bodies
            None => {
                let head = String::from_utf8_lossy(&self.bytes[..self.bytes.len().min(512)])
                    .to_ascii_lowercase();
                head.contains("<html") || head.contains("<!doctype html")
            }
        }
    }
}

/// A classified fetch failure
#[derive(Debug, Clone, Error)]
#[error("{reason}: {message}")]
pub struct FetchError {
    pub reason: FailureReason,
    pub message: String,
}

impl FetchError {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    /// Classifies a non-success HTTP status
    pub fn from_status(status: StatusCode) -> Self {
        let reason = match status.as_u16() {
            404 | 410 => FailureReason::NotFound,
            429 => FailureReason::RateLimited,
            400..=499 => FailureReason::ClientError,
            _ => FailureReason::ServerError,
        };
        Self::new(reason, format!("HTTP {}", status))
    }

    /// Classifies a transport error from reqwest
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        let reason = if error.is_timeout() {
            FailureReason::Timeout
        } else {
            FailureReason::ConnectionFailed
        };
        Self::new(reason, error.to_string())
    }
}

/// One retrieval strategy
///
/// A single call is one attempt, redirects included. Retry, timeout and
/// politeness are applied around it by [`fetch_with_retry`], so any strategy
/// (static HTTP, a rendering browser, an in-memory stub) gets them alike.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchResult, FetchError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The crawl configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &CrawlConfig) -> Result<Client, reqwest::Error> {
    let timeout = config.request_timeout();

    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::none()) // Handle redirects manually
        .gzip(true)
        .brotli(true)
        .build()
}

/// Static HTTP fetch strategy
pub struct HttpFetcher {
    client: Client,
    max_redirects: u32,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(config: &CrawlConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config)?,
            max_redirects: config.max_redirects,
            max_bytes: config.max_resource_bytes,
        })
    }

    async fn read_body(&self, mut response: reqwest::Response) -> Result<Vec<u8>, FetchError> {
        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(FetchError::new(
                    FailureReason::TooLarge,
                    format!("Content-Length {} exceeds limit of {} bytes", length, self.max_bytes),
                ));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::from_reqwest(&e))?
        {
            if body.len() as u64 + chunk.len() as u64 > self.max_bytes {
                return Err(FetchError::new(
                    FailureReason::TooLarge,
                    format!("Body exceeds limit of {} bytes", self.max_bytes),
                ));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    /// Fetches a URL, following up to `max-redirects` hops
    ///
    /// # Classification
    ///
    /// | Condition | Reason |
    /// |-----------|--------|
    /// | HTTP 404, 410 | `not_found` |
    /// | HTTP 429 | `rate_limited` |
    /// | Other 4xx | `client_error` |
    /// | HTTP 5xx | `server_error` |
    /// | Timeout | `timeout` |
    /// | DNS, connect, TLS, body read | `connection_failed` |
    /// | Body over the size limit | `too_large` |
    /// | Redirect loop or chain over the limit | `too_many_redirects` |
    async fn fetch(&self, url: &Url) -> Result<FetchResult, FetchError> {
        let mut current = url.clone();
        let mut seen = HashSet::new();
        seen.insert(current.to_string());
        let mut hops = 0u32;

        loop {
            let response = self
                .client
                .get(current.clone())
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest(&e))?;

            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        FetchError::new(
                            FailureReason::ClientError,
                            format!("HTTP {} without Location header", status),
                        )
                    })?;
                let next = current.join(location).map_err(|e| {
                    FetchError::new(
                        FailureReason::ClientError,
                        format!("Invalid redirect target '{}': {}", location, e),
                    )
                })?;

                hops += 1;
                if hops > self.max_redirects {
                    return Err(FetchError::new(
                        FailureReason::TooManyRedirects,
                        format!("More than {} redirects", self.max_redirects),
                    ));
                }
                if !seen.insert(next.to_string()) {
                    return Err(FetchError::new(
                        FailureReason::TooManyRedirects,
                        format!("Redirect loop at {}", next),
                    ));
                }

                tracing::debug!("Redirect {} -> {}", current, next);
                current = next;
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::from_status(status));
            }

            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let final_url = response.url().clone();
            let bytes = self.read_body(response).await?;

            return Ok(FetchResult {
                bytes,
                content_type,
                final_url,
                status: status.as_u16(),
            });
        }
    }
}

/// Attempt budget for one URL
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub retries: u32,

    /// Delay before the first retry; doubled for each further retry
    pub backoff: Duration,

    /// Hard limit on a single attempt
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self {
            retries: config.retry_count,
            backoff: config.retry_backoff(),
            timeout: config.request_timeout(),
        }
    }

    /// Backoff before retry number `attempt` (zero-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Fetches a URL with timeout, politeness and retry
///
/// # Retry Logic
///
/// | Condition | Action |
/// |-----------|--------|
/// | 5xx, 429, timeout, connection failure | Retry with exponential backoff |
/// | 404, 410, other 4xx, too large, redirects | Fail immediately |
///
/// Every attempt waits for its politeness slot. The whole future may be
/// dropped at any suspension point to cancel the fetch.
pub async fn fetch_with_retry(
    fetcher: &dyn Fetch,
    url: &Url,
    policy: &RetryPolicy,
    politeness: &Politeness,
) -> Result<FetchResult, FetchError> {
    let mut attempt = 0u32;
    loop {
        politeness.wait(url).await;

        let result = match tokio::time::timeout(policy.timeout, fetcher.fetch(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::new(
                FailureReason::Timeout,
                format!("No response within {:?}", policy.timeout),
            )),
        };

        match result {
            Ok(fetched) => return Ok(fetched),
            Err(e) if e.reason.is_transient() && attempt < policy.retries => {
                if e.reason == FailureReason::RateLimited {
                    politeness.mark_rate_limited(url);
                }
                let delay = policy.delay(attempt);
                tracing::debug!(
                    "Attempt {} for {} failed ({}), retrying in {:?}",
                    attempt + 1,
                    url,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> CrawlConfig {
        CrawlConfig {
            request_timeout_ms: 2_000,
            max_redirects: 3,
            max_resource_bytes: 1024,
            ..CrawlConfig::default()
        }
    }

    fn fast_policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            backoff: Duration::from_millis(1),
            timeout: Duration::from_secs(2),
        }
    }

    /// Answers with a scripted sequence of results
    struct ScriptedFetch {
        results: Mutex<Vec<Result<FetchResult, FetchError>>>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Fetch for ScriptedFetch {
        async fn fetch(&self, _url: &Url) -> Result<FetchResult, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results.lock().unwrap().remove(0)
        }
    }

    fn ok_result(url: &Url) -> FetchResult {
        FetchResult {
            bytes: b"ok".to_vec(),
            content_type: Some("text/plain".to_string()),
            final_url: url.clone(),
            status: 200,
        }
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client(&test_config()).is_ok());
    }

    #[test]
    fn test_status_classification() {
        let reason = |code: u16| FetchError::from_status(StatusCode::from_u16(code).unwrap()).reason;
        assert_eq!(reason(404), FailureReason::NotFound);
        assert_eq!(reason(410), FailureReason::NotFound);
        assert_eq!(reason(429), FailureReason::RateLimited);
        assert_eq!(reason(403), FailureReason::ClientError);
        assert_eq!(reason(503), FailureReason::ServerError);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            retries: 3,
            backoff: Duration::from_millis(100),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_is_html() {
        let url = Url::parse("https://example.com/").unwrap();
        let mut result = ok_result(&url);
        result.content_type = Some("text/html; charset=utf-8".to_string());
        assert!(result.is_html());

        result.content_type = Some("image/png".to_string());
        assert!(!result.is_html());

        result.content_type = None;
        result.bytes = b"<!DOCTYPE html><html></html>".to_vec();
        assert!(result.is_html());
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let url = Url::parse("https://example.com/").unwrap();
        let fetcher = ScriptedFetch {
            results: Mutex::new(vec![
                Err(FetchError::new(FailureReason::ServerError, "HTTP 503")),
                Err(FetchError::new(FailureReason::ConnectionFailed, "reset")),
                Ok(ok_result(&url)),
            ]),
            calls: AtomicU32::new(0),
        };

        let result = fetch_with_retry(&fetcher, &url, &fast_policy(2), &Politeness::new(Duration::ZERO)).await;
        assert!(result.is_ok());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_retry_budget() {
        let url = Url::parse("https://example.com/").unwrap();
        let fetcher = ScriptedFetch {
            results: Mutex::new(vec![
                Err(FetchError::new(FailureReason::ServerError, "HTTP 500")),
                Err(FetchError::new(FailureReason::ServerError, "HTTP 500")),
            ]),
            calls: AtomicU32::new(0),
        };

        let err = fetch_with_retry(&fetcher, &url, &fast_policy(1), &Politeness::new(Duration::ZERO))
            .await
            .unwrap_err();
        assert_eq!(err.reason, FailureReason::ServerError);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let url = Url::parse("https://example.com/missing").unwrap();
        let fetcher = ScriptedFetch {
            results: Mutex::new(vec![Err(FetchError::new(FailureReason::NotFound, "HTTP 404"))]),
            calls: AtomicU32::new(0),
        };

        let err = fetch_with_retry(&fetcher, &url, &fast_policy(3), &Politeness::new(Duration::ZERO))
            .await
            .unwrap_err();
        assert_eq!(err.reason, FailureReason::NotFound);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_http_fetch_follows_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html>new</html>")
                    .insert_header("content-type", "text/html"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&test_config()).unwrap();
        let url = Url::parse(&format!("{}/old", server.uri())).unwrap();
        let result = fetcher.fetch(&url).await.unwrap();

        assert_eq!(result.final_url.path(), "/new");
        assert_eq!(result.bytes, b"<html>new</html>");
        assert!(result.is_html());
    }

    #[tokio::test]
    async fn test_http_fetch_detects_redirect_loop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/b"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/a"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&test_config()).unwrap();
        let url = Url::parse(&format!("{}/a", server.uri())).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert_eq!(err.reason, FailureReason::TooManyRedirects);
    }

    #[tokio::test]
    async fn test_http_fetch_rejects_large_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&test_config()).unwrap();
        let url = Url::parse(&format!("{}/big.bin", server.uri())).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert_eq!(err.reason, FailureReason::TooLarge);
    }

    #[tokio::test]
    async fn test_http_fetch_classifies_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&test_config()).unwrap();
        let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert_eq!(err.reason, FailureReason::NotFound);
    }
}
