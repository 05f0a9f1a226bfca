//! HTTP Client Abstraction
//!
//! Provides async HTTP operations, retry policy, and ranged media streams.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::io::AsyncRead;

use crate::error::{BridgeError, Result};

/// HTTP method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
}

/// HTTP request builder
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Request the resource starting at `offset` (open-ended byte range).
    ///
    /// An offset of zero leaves the request untouched so servers without
    /// range support are not confused by a redundant `bytes=0-`.
    pub fn range_from(self, offset: u64) -> Self {
        if offset == 0 {
            self
        } else {
            self.header("Range", format!("bytes={}-", offset))
        }
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Byte offset requested through the `Range` header, if any.
    pub fn range_start(&self) -> Option<u64> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("range"))
            .and_then(|(_, v)| v.strip_prefix("bytes="))
            .and_then(|v| v.split('-').next())
            .and_then(|v| v.trim().parse().ok())
    }
}

/// HTTP response
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    /// Check if response status is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if response status indicates a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if response status indicates a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

/// Parsed `Content-Range` header (`bytes <start>-<end>/<total|*>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: Option<u64>,
}

impl ContentRange {
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.trim().strip_prefix("bytes")?.trim_start();
        let (range, total) = rest.split_once('/')?;
        let (start, end) = range.split_once('-')?;

        let total = match total.trim() {
            "*" => None,
            t => Some(t.parse().ok()?),
        };

        Some(Self {
            start: start.trim().parse().ok()?,
            end: end.trim().parse().ok()?,
            total,
        })
    }

    /// Resource length from the `bytes */<total>` form a server sends with
    /// `416 Range Not Satisfiable`.
    pub fn parse_unsatisfied(value: &str) -> Option<u64> {
        let rest = value.trim().strip_prefix("bytes")?.trim_start();
        rest.strip_prefix("*/")?.trim().parse().ok()
    }
}

/// A streaming response body plus the headers needed to resume it.
pub struct DownloadStream {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Box<dyn AsyncRead + Send + Unpin>,
}

impl DownloadStream {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `true` when the server honoured a range request (206 Partial Content).
    pub fn is_partial(&self) -> bool {
        self.status == 206
    }

    /// `true` for `416 Range Not Satisfiable`, typically a range that starts
    /// at or past the end of the resource.
    pub fn is_range_not_satisfiable(&self) -> bool {
        self.status == 416
    }

    /// Resource length reported alongside a 416.
    pub fn unsatisfied_length(&self) -> Option<u64> {
        if !self.is_range_not_satisfiable() {
            return None;
        }
        self.header("content-range")
            .and_then(ContentRange::parse_unsatisfied)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|v| v.trim().parse().ok())
    }

    pub fn content_range(&self) -> Option<ContentRange> {
        self.header("content-range").and_then(ContentRange::parse)
    }

    /// Size of the complete resource, when the server disclosed it.
    pub fn total_size(&self) -> Option<u64> {
        if self.is_partial() {
            let range = self.content_range()?;
            range.total.or_else(|| {
                self.content_length()
                    .map(|len| range.start.saturating_add(len))
            })
        } else {
            self.content_length()
        }
    }
}

impl fmt::Debug for DownloadStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadStream")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Whether to use exponential backoff
    pub use_exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            use_exponential_backoff: true,
        }
    }
}

/// Async HTTP client trait
///
/// Implementations should handle:
/// - Connection pooling and keep-alive
/// - TLS certificate validation
/// - Forwarding the `Range` header untouched so transfers can resume
///
/// # Example
///
/// ```ignore
/// use bridge_traits::http::{HttpClient, HttpRequest};
///
/// async fn resume(client: &dyn HttpClient, offset: u64) -> Result<()> {
///     let stream = client
///         .download_stream(HttpRequest::get("https://cdn.example.com/m1.mp4").range_from(offset))
///         .await?;
///     if !stream.is_partial() {
///         // server ignored the range; start over
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Execute an HTTP request and buffer the whole body.
    ///
    /// # Errors
    ///
    /// Returns error if the connection fails, TLS validation fails, the
    /// request times out or the maximum number of retries is exceeded.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Execute an HTTP request with custom retry policy
    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        let _ = policy;
        self.execute(request).await
    }

    /// Open a streaming download.
    ///
    /// Non-2xx statuses are reported as errors. A `206` status means the
    /// requested range was honoured; a `200` in answer to a range request
    /// means the body starts at byte zero.
    async fn download_stream(&self, request: HttpRequest) -> Result<DownloadStream>;
}

/// Convert a non-success status into a bridge error.
pub fn status_error(status: u16, url: &str) -> BridgeError {
    BridgeError::OperationFailed(format!("HTTP {} for {}", status, url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_request_builder() {
        let request = HttpRequest::get("https://example.com/a.mp4")
            .header("User-Agent", "test")
            .timeout(Duration::from_secs(30));

        assert_eq!(request.url, "https://example.com/a.mp4");
        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.headers.get("User-Agent"), Some(&"test".to_string()));
        assert_eq!(request.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_range_header() {
        let request = HttpRequest::get("https://example.com/a.mp4").range_from(1024);
        assert_eq!(request.headers.get("Range"), Some(&"bytes=1024-".to_string()));
        assert_eq!(request.range_start(), Some(1024));

        let request = HttpRequest::get("https://example.com/a.mp4").range_from(0);
        assert!(request.headers.is_empty());
        assert_eq!(request.range_start(), None);
    }

    #[test]
    fn test_http_response_status_checks() {
        let response = HttpResponse {
            status: 200,
            headers: HashMap::new(),
            body: Bytes::from("test"),
        };

        assert!(response.is_success());
        assert!(!response.is_client_error());
        assert!(!response.is_server_error());
    }

    #[test]
    fn test_content_range_parse() {
        assert_eq!(
            ContentRange::parse("bytes 100-199/1000"),
            Some(ContentRange {
                start: 100,
                end: 199,
                total: Some(1000)
            })
        );
        assert_eq!(
            ContentRange::parse("bytes 0-9/*").map(|r| r.total),
            Some(None)
        );
        assert_eq!(ContentRange::parse("items 0-9/10"), None);
        assert_eq!(ContentRange::parse("bytes garbage"), None);
    }

    #[test]
    fn test_download_stream_total_size() {
        let mut headers = HashMap::new();
        headers.insert("Content-Range".to_string(), "bytes 40-99/100".to_string());
        headers.insert("Content-Length".to_string(), "60".to_string());

        let partial = DownloadStream {
            status: 206,
            headers: headers.clone(),
            body: Box::new(tokio::io::empty()),
        };
        assert!(partial.is_partial());
        assert_eq!(partial.total_size(), Some(100));

        let mut full_headers = HashMap::new();
        full_headers.insert("content-length".to_string(), "100".to_string());
        let full = DownloadStream {
            status: 200,
            headers: full_headers,
            body: Box::new(tokio::io::empty()),
        };
        assert!(!full.is_partial());
        assert_eq!(full.total_size(), Some(100));
    }

    #[test]
    fn test_unsatisfied_range_reports_length() {
        assert_eq!(ContentRange::parse_unsatisfied("bytes */100"), Some(100));
        assert_eq!(ContentRange::parse_unsatisfied("bytes 0-9/100"), None);

        let mut headers = HashMap::new();
        headers.insert("Content-Range".to_string(), "bytes */100".to_string());
        let rejected = DownloadStream {
            status: 416,
            headers: headers.clone(),
            body: Box::new(tokio::io::empty()),
        };
        assert!(rejected.is_range_not_satisfiable());
        assert_eq!(rejected.unsatisfied_length(), Some(100));

        let ok = DownloadStream {
            status: 200,
            headers,
            body: Box::new(tokio::io::empty()),
        };
        assert_eq!(ok.unsatisfied_length(), None);
    }
}
