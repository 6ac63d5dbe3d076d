//! HTTP fetch utilities + short-lived response cache for Crease sources.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "crease-storage";

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) crease/0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Total attempts per fetch are `max_retries + 1`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_retries = attempts.saturating_sub(1);
        self
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub headers: Vec<(String, String)>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            headers: vec![
                (
                    "accept".to_string(),
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
                ),
                ("accept-language".to_string(), "en-US,en;q=0.5".to_string()),
            ],
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchedResponse {
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.to_ascii_lowercase().contains("text/html"))
            .unwrap_or(false)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid request header name {name:?}"))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for request header {name}"))?;
            headers.insert(name, value);
        }

        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .default_headers(headers);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    pub async fn fetch_bytes(
        &self,
        run_id: Uuid,
        source_id: &str,
        url: &str,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", %run_id, source_id, url);
        self.fetch_with_retries(url).instrument(span).await
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0;
        loop {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let content_type = resp
                            .headers()
                            .get(CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .map(ToString::to_string);
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            content_type,
                            body,
                            fetched_at: Utc::now(),
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(attempt, %status, "retrying after retryable status");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(attempt, error = %err, "retrying after request error");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}

/// Cache key for a request target: fragment dropped, trailing slash trimmed,
/// scheme and host lowercased.
pub fn normalize_cache_key(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            let path = parsed.path().trim_end_matches('/').to_string();
            let path = if path.is_empty() { "/".to_string() } else { path };
            parsed.set_path(&path);
            let key = parsed.to_string();
            if path == "/" {
                key.trim_end_matches('/').to_string()
            } else {
                key
            }
        }
        Err(_) => url.trim().to_ascii_lowercase(),
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    stored_at: Instant,
    response: FetchedResponse,
}

/// In-process response cache with a fixed time-to-live.
#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, url: &str) -> Option<FetchedResponse> {
        let key = normalize_cache_key(url);
        let mut entries = self.entries.lock().await;
        match entries.get(&key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.response.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub async fn insert(&self, url: &str, response: FetchedResponse) {
        let key = normalize_cache_key(url);
        self.entries.lock().await.insert(
            key,
            CacheEntry {
                stored_at: Instant::now(),
                response,
            },
        );
    }

    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn http_response(status_line: &str, content_type: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    async fn serve_responses(responses: Vec<String>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            let mut responses = responses.into_iter();
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let Some(resp) = responses.next() else { break };
                let _ = socket.write_all(resp.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}/page"), hits)
    }

    fn fast_config() -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(5),
            backoff: BackoffPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            ..Default::default()
        }
    }

    fn sample_response(body: &str) -> FetchedResponse {
        FetchedResponse {
            status: StatusCode::OK,
            final_url: "https://www.cricbuzz.com/live".to_string(),
            content_type: Some("text/html; charset=utf-8".to_string()),
            body: body.as_bytes().to_vec(),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn default_budget_is_three_attempts() {
        assert_eq!(BackoffPolicy::default().max_retries + 1, 3);
        assert_eq!(BackoffPolicy::default().with_max_attempts(5).max_retries, 4);
        assert_eq!(BackoffPolicy::default().with_max_attempts(0).max_retries, 0);
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
    }

    #[test]
    fn cache_keys_ignore_fragment_and_trailing_slash() {
        assert_eq!(
            normalize_cache_key("HTTPS://WWW.Cricbuzz.com/cricket-match/live-scores/#top"),
            normalize_cache_key("https://www.cricbuzz.com/cricket-match/live-scores")
        );
        assert_eq!(
            normalize_cache_key("https://www.cricbuzz.com/"),
            "https://www.cricbuzz.com"
        );
        assert_ne!(
            normalize_cache_key("https://www.cricbuzz.com/a?page=1"),
            normalize_cache_key("https://www.cricbuzz.com/a?page=2")
        );
    }

    #[tokio::test]
    async fn cache_serves_fresh_entries_and_drops_expired_ones() {
        let cache = ResponseCache::new(Duration::from_secs(300));
        cache
            .insert("https://www.cricbuzz.com/live/", sample_response("<html>one</html>"))
            .await;
        let hit = cache.get("https://www.cricbuzz.com/live").await.expect("cache hit");
        assert_eq!(hit.text(), "<html>one</html>");

        let expired = ResponseCache::new(Duration::ZERO);
        expired
            .insert("https://www.cricbuzz.com/live", sample_response("<html>two</html>"))
            .await;
        assert!(expired.get("https://www.cricbuzz.com/live").await.is_none());
        assert_eq!(expired.len().await, 0);
    }

    #[tokio::test]
    async fn purge_removes_only_stale_entries() {
        let cache = ResponseCache::new(Duration::ZERO);
        cache.insert("https://a.example/x", sample_response("x")).await;
        cache.insert("https://a.example/y", sample_response("y")).await;
        assert_eq!(cache.purge_expired().await, 2);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn fetch_captures_content_type() {
        let (url, hits) = serve_responses(vec![http_response(
            "200 OK",
            "text/html; charset=utf-8",
            "<html><title>Live</title></html>",
        )])
        .await;
        let fetcher = HttpFetcher::new(fast_config()).expect("fetcher");
        let resp = fetcher
            .fetch_bytes(Uuid::new_v4(), "cricbuzz", &url)
            .await
            .expect("fetch");
        assert!(resp.is_html());
        assert!(resp.text().contains("Live"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_retries_server_errors_then_succeeds() {
        let (url, hits) = serve_responses(vec![
            http_response("503 Service Unavailable", "text/plain", "busy"),
            http_response("200 OK", "text/html", "<html>ok</html>"),
        ])
        .await;
        let fetcher = HttpFetcher::new(fast_config()).expect("fetcher");
        let resp = fetcher
            .fetch_bytes(Uuid::new_v4(), "cricbuzz", &url)
            .await
            .expect("fetch after retry");
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_does_not_retry_client_errors() {
        let (url, hits) = serve_responses(vec![
            http_response("404 Not Found", "text/html", "missing"),
            http_response("200 OK", "text/html", "<html>ok</html>"),
        ])
        .await;
        let fetcher = HttpFetcher::new(fast_config()).expect("fetcher");
        let err = fetcher
            .fetch_bytes(Uuid::new_v4(), "cricbuzz", &url)
            .await
            .expect_err("404 should fail");
        assert!(matches!(err, FetchError::HttpStatus { status: 404, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalid_header_is_rejected_at_construction() {
        let config = HttpClientConfig {
            headers: vec![("bad header".to_string(), "x".to_string())],
            ..Default::default()
        };
        assert!(HttpFetcher::new(config).is_err());
    }
}
