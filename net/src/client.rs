//! HTTP client with rate limiting, caching, and retry.
//!
//! One `reqwest::Client` per `HttpClient`, with browser-like default
//! headers and a capped redirect policy. Transient failures (timeouts,
//! connection errors, 5xx, 429) retry with exponential backoff through
//! the tokio timer; 4xx and TLS failures do not.

use crate::cache::RequestCache;
use crate::throttle::RateLimiter;
use pagemill_config::Config;
use pagemill_types::{Error, ErrorKind, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CONNECTION};
use reqwest::{Method, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use url::Url;

/// Redirect hop cap.
const MAX_REDIRECTS: usize = 10;

/// Base delay for exponential backoff (`base * 2^attempt`).
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Progress callback for batch fetches: `(completed, total)`.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Rate-limited, caching HTTP client.
pub struct HttpClient {
    config: Config,
    limiter: Arc<RateLimiter>,
    cache: Option<RequestCache>,
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: &Config) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::from_config(config));
        Self::with_limiter(config, limiter)
    }

    /// Build a client sharing an existing rate limiter.
    pub fn with_limiter(config: &Config, limiter: Arc<RateLimiter>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| {
                Error::new(
                    ErrorKind::ConnectionFailed,
                    format!("failed to build HTTP client: {e}"),
                )
                .retryable(false)
                .with_source(e)
            })?;

        let cache = if config.cache_enabled {
            Some(RequestCache::new(config)?)
        } else {
            None
        };

        Ok(Self {
            config: config.clone(),
            limiter,
            cache,
            inner,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    #[must_use]
    pub fn cache(&self) -> Option<&RequestCache> {
        self.cache.as_ref()
    }

    /// Fetch a URL body, consulting the cache first when enabled.
    pub async fn get(&self, url: &str, use_cache: bool) -> Result<String> {
        if use_cache
            && let Some(cache) = &self.cache
            && let Some(body) = cache.get(url)
        {
            tracing::debug!(url, "cache hit");
            return Ok(body);
        }

        let parsed = parse_url(url)?;
        let response = self.request_with_retries(Method::GET, &parsed).await?;

        if let Some(length) = response.content_length()
            && length > self.config.max_file_size
        {
            return Err(size_exceeded(url, length, self.config.max_file_size));
        }
        let bytes = response.bytes().await.map_err(|e| {
            Error::new(
                ErrorKind::ConnectionFailed,
                format!("failed to read response body: {e}"),
            )
            .with_context("url", url)
            .with_source(e)
        })?;
        if bytes.len() as u64 > self.config.max_file_size {
            return Err(size_exceeded(url, bytes.len() as u64, self.config.max_file_size));
        }
        let body = String::from_utf8_lossy(&bytes).into_owned();

        if use_cache
            && let Some(cache) = &self.cache
            && let Err(err) = cache.set(url, &body)
        {
            tracing::warn!(url, error = %err, "cache write failed");
        }

        Ok(body)
    }

    /// Issue a HEAD request and return the response headers.
    pub async fn head(&self, url: &str) -> Result<HeaderMap> {
        let parsed = parse_url(url)?;
        let response = self.request_with_retries(Method::HEAD, &parsed).await?;
        Ok(response.headers().clone())
    }

    /// Sequential batch fetch. Failed URLs are recorded, not fatal.
    /// The returned pairs preserve input order.
    pub async fn get_many(&self, urls: &[String]) -> Vec<(String, Result<String>)> {
        let mut results = Vec::with_capacity(urls.len());
        for url in urls {
            let result = self.get(url, true).await;
            if let Err(err) = &result {
                tracing::warn!(url = url.as_str(), error = %err, "batch fetch failed, continuing");
            }
            results.push((url.clone(), result));
        }
        results
    }

    /// Concurrent batch fetch bounded globally by
    /// `max_concurrent_requests` and per host by `max_per_domain`.
    /// The returned pairs preserve input order.
    pub async fn get_many_parallel(
        &self,
        urls: &[String],
        max_per_domain: Option<usize>,
        on_progress: Option<ProgressFn>,
    ) -> Vec<(String, Result<String>)> {
        let total = urls.len();
        let global = Arc::new(Semaphore::new(self.config.max_concurrent_requests));
        let domains: Mutex<HashMap<String, Arc<Semaphore>>> = Mutex::new(HashMap::new());
        let completed = AtomicUsize::new(0);

        let fetches = urls.iter().map(|url| {
            let global = Arc::clone(&global);
            let domains = &domains;
            let completed = &completed;
            let on_progress = on_progress.clone();
            async move {
                let _global_permit = global.acquire_owned().await.ok();
                let domain_permit = match (max_per_domain, host_of(url)) {
                    (Some(limit), Some(host)) => {
                        let semaphore = {
                            let mut map =
                                domains.lock().unwrap_or_else(PoisonError::into_inner);
                            Arc::clone(
                                map.entry(host)
                                    .or_insert_with(|| Arc::new(Semaphore::new(limit))),
                            )
                        };
                        semaphore.acquire_owned().await.ok()
                    }
                    _ => None,
                };

                let result = self.get(url, true).await;
                drop(domain_permit);

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(progress) = &on_progress {
                    progress(done, total);
                }
                if let Err(err) = &result {
                    tracing::warn!(url = url.as_str(), error = %err, "parallel fetch failed, continuing");
                }
                (url.clone(), result)
            }
        });

        futures_util::future::join_all(fetches).await
    }

    /// One rate-limited request with up to `max_retries` extra attempts.
    async fn request_with_retries(&self, method: Method, url: &Url) -> Result<reqwest::Response> {
        let max_retries = self.config.max_retries;
        let mut last_error: Option<Error> = None;

        for attempt in 0..=max_retries {
            self.limiter.acquire_url(url, 1).await;

            let start = Instant::now();
            let outcome = self
                .inner
                .request(method.clone(), url.clone())
                .send()
                .await;

            let error = match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        tracing::info!(
                            url = %url,
                            status = status.as_u16(),
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            attempt = attempt + 1,
                            "request succeeded"
                        );
                        return Ok(response);
                    }
                    status_error(status, url.as_str())
                }
                Err(e) => classify_request_error(&e, url.as_str()),
            };

            if error.is_retryable() && attempt < max_retries {
                let backoff = BACKOFF_BASE * 2u32.pow(attempt);
                tracing::warn!(
                    url = %url,
                    error = %error,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    "request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                last_error = Some(error);
            } else {
                tracing::error!(url = %url, error = %error, attempt = attempt + 1, "request failed");
                return Err(error);
            }
        }

        let mut err = Error::new(
            ErrorKind::MaxRetriesExceeded,
            format!("request failed after {} attempts", max_retries + 1),
        )
        .with_context("url", url.as_str())
        .with_context("attempts", (max_retries + 1).to_string());
        if let Some(last) = last_error {
            err = err.with_source(last);
        }
        Err(err)
    }
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| {
        Error::new(ErrorKind::ConnectionFailed, format!("invalid URL: {e}"))
            .retryable(false)
            .with_context("url", url)
            .with_source(e)
    })
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_string)
}

fn size_exceeded(url: &str, size: u64, limit: u64) -> Error {
    Error::new(
        ErrorKind::MemoryLimitExceeded,
        format!("response of {size} bytes exceeds limit of {limit} bytes"),
    )
    .with_context("url", url)
    .with_context("size", size.to_string())
    .with_context("limit", limit.to_string())
}

/// Status >= 400. Only 5xx, 429, and 408 are worth retrying.
fn status_error(status: StatusCode, url: &str) -> Error {
    let retryable =
        status.is_server_error() || matches!(status.as_u16(), 429 | 408);
    Error::new(ErrorKind::HttpError, format!("HTTP {}", status.as_u16()))
        .retryable(retryable)
        .with_context("url", url)
        .with_context("status", status.as_u16().to_string())
}

/// Map transport-level failures onto the error taxonomy.
fn classify_request_error(e: &reqwest::Error, url: &str) -> Error {
    if e.is_timeout() {
        return Error::new(ErrorKind::NetworkTimeout, format!("request timed out: {e}"))
            .with_context("url", url);
    }
    if is_tls_error(e) {
        return Error::new(ErrorKind::SslError, format!("TLS failure: {e}"))
            .retryable(false)
            .with_context("url", url);
    }
    Error::new(ErrorKind::ConnectionFailed, format!("connection failed: {e}"))
        .with_context("url", url)
}

fn is_tls_error(e: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(e);
    while let Some(err) = source {
        let text = err.to_string().to_ascii_lowercase();
        if text.contains("certificate") || text.contains("tls") || text.contains("ssl") {
            return true;
        }
        source = std::error::Error::source(err);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::{classify_request_error, status_error};
    use pagemill_types::ErrorKind;
    use reqwest::StatusCode;

    #[test]
    fn test_status_retryability() {
        assert!(!status_error(StatusCode::NOT_FOUND, "u").is_retryable());
        assert!(!status_error(StatusCode::FORBIDDEN, "u").is_retryable());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "u").is_retryable());
        assert!(status_error(StatusCode::REQUEST_TIMEOUT, "u").is_retryable());
        assert!(status_error(StatusCode::INTERNAL_SERVER_ERROR, "u").is_retryable());
        assert!(status_error(StatusCode::BAD_GATEWAY, "u").is_retryable());
    }

    #[test]
    fn test_status_error_carries_status_context() {
        let err = status_error(StatusCode::NOT_FOUND, "https://example.com/x");
        assert_eq!(err.kind(), ErrorKind::HttpError);
        assert_eq!(err.context_value("status"), Some("404"));
    }

    #[tokio::test]
    async fn test_connect_error_classification() {
        // Port 1 on localhost refuses connections.
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(2))
            .build()
            .unwrap();
        let err = client
            .get("http://127.0.0.1:1/")
            .send()
            .await
            .expect_err("must fail");
        let classified = classify_request_error(&err, "http://127.0.0.1:1/");
        assert!(matches!(
            classified.kind(),
            ErrorKind::ConnectionFailed | ErrorKind::NetworkTimeout
        ));
        assert!(classified.is_retryable());
    }
}
