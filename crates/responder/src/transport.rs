//! HTTP transport: connection pool, auth, status-classified error
//! mapping, and the raw byte stream for SSE responses.
//!
//! One [`Transport`] call is a single attempt; the responder layers
//! retry on top so alternate transports (tests, recordings) get the
//! same policy for free.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use casc_domain::error::{Error, Result};
use casc_domain::stream::BoxStream;

use crate::retry::parse_retry_after;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A transport-level request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    /// Per-call total timeout; `None` uses the client default.
    pub timeout: Option<Duration>,
}

impl TransportRequest {
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: BTreeMap::new(),
            body: Some(body),
            timeout: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A fully-read transport response (status already classified OK).
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Raw bytes of a streaming response body.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One HTTP attempt. Implementations map failures through
/// [`classify_status`] so every caller sees the same error taxonomy.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Unary request: send, read the full body.
    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse>;

    /// Streaming request: send, classify the status line, hand back the
    /// body as a byte stream.
    async fn stream(&self, request: &TransportRequest) -> Result<ByteStream>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Map a non-2xx status to the error taxonomy.
///
/// 401/403 → Authentication; 429 → RateLimit (with parsed Retry-After);
/// other 4xx → InvalidRequest; 5xx → Server. 408 and 425 are spurious
/// client-side timeouts and map to Connection so they stay retryable.
pub fn classify_status(status: u16, body: &str, retry_after: Option<&str>) -> Error {
    match status {
        401 | 403 => Error::Authentication(short_body(body)),
        429 => Error::RateLimit {
            message: short_body(body),
            retry_after: retry_after.and_then(parse_retry_after),
        },
        408 | 425 => Error::Connection(format!("HTTP {status}: {}", short_body(body))),
        400..=499 => Error::InvalidRequest(format!("HTTP {status}: {}", short_body(body))),
        _ => Error::Server {
            status,
            message: short_body(body),
        },
    }
}

fn short_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= 400 {
        return trimmed.to_string();
    }
    let mut cut = 400;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &trimmed[..cut])
}

/// Convert a [`reqwest::Error`] into the domain error type.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Connection(format!("timeout: {e}"))
    } else {
        Error::Connection(e.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// reqwest-backed implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Production transport over a pooled [`reqwest::Client`].
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(default_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(default_timeout)
            .build()
            .map_err(from_reqwest)?;
        Ok(Self { client })
    }

    fn build(&self, request: &TransportRequest) -> reqwest::RequestBuilder {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse> {
        let response = self.build(request).send().await.map_err(from_reqwest)?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.text().await.map_err(from_reqwest)?;

        if !(200..300).contains(&status) {
            return Err(classify_status(status, &body, retry_after.as_deref()));
        }
        Ok(TransportResponse { status, body })
    }

    async fn stream(&self, request: &TransportRequest) -> Result<ByteStream> {
        let response = self.build(request).send().await.map_err(from_reqwest)?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let body = response.text().await.map_err(from_reqwest)?;
            return Err(classify_status(status, &body, retry_after.as_deref()));
        }

        let stream = async_stream::stream! {
            let mut response = response;
            loop {
                match response.chunk().await {
                    Ok(Some(bytes)) => yield Ok(bytes.to_vec()),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(from_reqwest(e));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_map_to_authentication() {
        assert_eq!(classify_status(401, "no", None).code(), "authentication_error");
        assert_eq!(classify_status(403, "no", None).code(), "authentication_error");
    }

    #[test]
    fn rate_limit_parses_retry_after() {
        let err = classify_status(429, "slow", Some("2"));
        match err {
            Error::RateLimit { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(2)));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn plain_4xx_is_invalid_request() {
        let err = classify_status(404, "missing", None);
        assert_eq!(err.code(), "invalid_request_error");
        assert!(!err.retryable());
    }

    #[test]
    fn timeouts_stay_retryable() {
        assert!(classify_status(408, "timeout", None).retryable());
        assert!(classify_status(425, "too early", None).retryable());
    }

    #[test]
    fn serverside_is_retryable() {
        let err = classify_status(502, "bad gateway", None);
        assert_eq!(err.code(), "server_error");
        assert!(err.retryable());
        assert_eq!(err.http_status(), Some(502));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let err = classify_status(500, &body, None);
        assert!(err.to_string().len() < 600);
    }
}
