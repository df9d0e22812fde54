//! JSON-over-HTTP transport shared by the GitHub and Conbench clients.
//!
//! [`JsonApi`] is the seam every client talks through. [`HttpClient`] is the
//! reqwest-backed implementation: a per-call timeout, a cookie-keeping
//! session, and bounded exponential backoff on transient status codes.
//! Tests use [`crate::fakes::FakeApi`] instead.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::{AlertError, Result};

/// Per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = concat!("benchalerts/", env!("CARGO_PKG_VERSION"));

/// A JSON API reachable by relative paths.
///
/// Query parameters are `(name, value)` pairs.
#[async_trait]
pub trait JsonApi: Send + Sync {
    /// `GET {base}{path}` and decode the JSON body.
    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value>;

    /// `POST {base}{path}` with a JSON body. Returns `None` for an empty response.
    async fn post(&self, path: &str, body: Option<&Value>) -> Result<Option<Value>>;
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Exponential backoff for transient HTTP failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each one after.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // 1 + 2 + 4 + 8 + 16 = 31s of waiting at most
        RetryPolicy {
            max_retries: 5,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Status codes worth another attempt.
    pub fn is_transient(status: StatusCode) -> bool {
        matches!(status.as_u16(), 429 | 502 | 503 | 504)
    }

    /// Whether to retry after `retries_done` retries ended in `status`.
    pub fn should_retry(&self, status: StatusCode, retries_done: u32) -> bool {
        Self::is_transient(status) && retries_done < self.max_retries
    }

    /// Delay before the `retry`-th retry (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.backoff_base.saturating_mul(factor)
    }
}

// ---------------------------------------------------------------------------
// HttpClient
// ---------------------------------------------------------------------------

/// reqwest-backed [`JsonApi`].
pub struct HttpClient {
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpClient {
    /// Create a client rooted at `base_url` sending `headers` on every request.
    pub fn new(base_url: &str, headers: HeaderMap) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(DEFAULT_TIMEOUT)
            .cookie_store(true)
            .default_headers(headers)
            .build()?;

        Ok(HttpClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Option<Value>> {
        let url = format!("{}{}", self.base_url, path);
        let mut retries_done = 0;

        loop {
            // Bodies are not logged; the Conbench login body carries a password.
            debug!("{method} {url} params={params:?}");

            let mut request = self.client.request(method.clone(), &url);
            if !params.is_empty() {
                request = request.query(params);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();

            if status.is_success() {
                let bytes = response.bytes().await?;
                if bytes.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(serde_json::from_slice(&bytes)?));
            }

            if self.retry.should_retry(status, retries_done) {
                retries_done += 1;
                let delay = self.retry.delay(retries_done);
                warn!(
                    status = status.as_u16(),
                    retry = retries_done,
                    delay_s = delay.as_secs_f64(),
                    "{method} {url} failed; retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let text = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "{method} {url} failed: {text}");
            return Err(AlertError::Http {
                status: status.as_u16(),
                method: method.to_string(),
                url,
                body: text,
            });
        }
    }
}

#[async_trait]
impl JsonApi for HttpClient {
    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        let value = self.send(Method::GET, path, params, None).await?;
        Ok(value.unwrap_or(Value::Null))
    }

    async fn post(&self, path: &str, body: Option<&Value>) -> Result<Option<Value>> {
        let empty = Value::Object(Default::default());
        self.send(Method::POST, path, &[], Some(body.unwrap_or(&empty)))
            .await
    }
}

/// Headers carrying a bearer token, plus an optional `Accept` media type.
pub fn bearer_headers(token: &str, accept: Option<&'static str>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let mut auth = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
        AlertError::InvalidValue {
            kind: "authorization token",
            value: "<redacted>".to_string(),
        }
    })?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);
    if let Some(accept) = accept {
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_statuses() {
        for code in [429, 502, 503, 504] {
            assert!(RetryPolicy::is_transient(StatusCode::from_u16(code).unwrap()));
        }
        for code in [400, 401, 403, 404, 422, 500] {
            assert!(!RetryPolicy::is_transient(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[test]
    fn test_retries_are_bounded() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(StatusCode::BAD_GATEWAY, 0));
        assert!(policy.should_retry(StatusCode::BAD_GATEWAY, 4));
        assert!(!policy.should_retry(StatusCode::BAD_GATEWAY, 5));
        assert!(!policy.should_retry(StatusCode::NOT_FOUND, 0));
        let disabled = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        assert!(!disabled.should_retry(StatusCode::TOO_MANY_REQUESTS, 0));
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=5).map(|n| policy.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
    }

    #[test]
    fn test_bearer_headers() {
        let headers = bearer_headers("tok", Some("application/vnd.github+json")).unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer tok");
        assert!(headers[AUTHORIZATION].is_sensitive());
        assert_eq!(headers[ACCEPT], "application/vnd.github+json");

        assert!(bearer_headers("bad\ntoken", None).is_err());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = HttpClient::new("https://conbench.example/api/", HeaderMap::new()).unwrap();
        assert_eq!(client.base_url(), "https://conbench.example/api");
    }
}
