//! # HTTP Retrieval Utilities
//!
//! This module provides an asynchronous API client wrapper around `reqwest`.
//! It handles base URLs, bearer tokens, default headers and timeouts, and
//! hands back a standardized [`ApiResponse`] for both success and failure
//! statuses so callers can classify errors (rate limits, rejections) on their
//! own terms.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, Url};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Default user agent; GitHub rejects requests without one.
pub const DEFAULT_USER_AGENT: &str = "TrendsAggregator/1.0";

/// Errors raised before or while talking to the remote service. A non-2xx
/// status is not an error at this level; see [`ApiResponse::success`].
#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("failed to decode response body: {0}")]
    Decode(String),

    #[error("failed to serialize request body: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for RetrieveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RetrieveError::Timeout
        } else if err.is_decode() {
            RetrieveError::Decode(err.to_string())
        } else {
            RetrieveError::Transport(err)
        }
    }
}

/// A standardized container for API responses.
///
/// This struct wraps the deserialized data along with metadata about the
/// HTTP transaction, such as status codes and headers.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The successfully deserialized response body, if any.
    pub data: Option<T>,
    /// The raw error body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

impl<T> ApiResponse<T> {
    /// Reads a header as an integer, ignoring malformed values.
    pub fn header_u64(&self, name: &str) -> Option<u64> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }
}

/// A flexible asynchronous HTTP client.
///
/// Cheap to share behind `Arc`; the inner `reqwest::Client` pools
/// connections across requests.
#[derive(Debug, Clone)]
pub struct ApiClient {
    inner: reqwest::Client,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
    /// An optional Bearer token used for authorization.
    auth_token: Option<String>,
}

impl ApiClient {
    /// Creates a new `ApiClient`.
    ///
    /// `base_url` must be absolute. A trailing slash is appended when missing
    /// so that relative paths join under it rather than replacing its last
    /// segment.
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RetrieveError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let url = Url::parse(&normalized).map_err(|e| RetrieveError::InvalidUrl(e.to_string()))?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));

        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .build()?;

        Ok(Self {
            inner,
            base_url: url,
            auth_token: auth_token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs an HTTP request and decodes a JSON body on success.
    ///
    /// `path` is joined onto the base URL; `query` pairs are URL-encoded.
    /// Non-2xx responses come back as `Ok` with `success == false` and the
    /// raw body in `error_body`.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        headers: Option<HeaderMap>,
        body: Option<&B>,
    ) -> Result<ApiResponse<T>, RetrieveError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let full_url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| RetrieveError::InvalidUrl(e.to_string()))?;
        let mut req = self.inner.request(method, full_url);

        if !query.is_empty() {
            req = req.query(query);
        }

        if let Some(h) = headers {
            req = req.headers(h);
        }

        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        if let Some(b) = body {
            let json_body = serde_json::to_string(b)?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        let response = req.send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();

        if status.is_success() {
            let bytes = response.bytes().await?;
            // Empty 2xx bodies (202/204) are valid for fire-and-forget calls.
            let data = if bytes.is_empty() {
                None
            } else {
                Some(
                    serde_json::from_slice::<T>(&bytes)
                        .map_err(|e| RetrieveError::Decode(e.to_string()))?,
                )
            };
            Ok(ApiResponse {
                data,
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        let client = ApiClient::new("https://api.github.com/v3", None, Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url().as_str(), "https://api.github.com/v3/");
        let joined = client.base_url().join("search/repositories").unwrap();
        assert_eq!(joined.as_str(), "https://api.github.com/v3/search/repositories");
    }

    #[test]
    fn relative_base_url_is_rejected() {
        let err = ApiClient::new("not a url", None, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, RetrieveError::InvalidUrl(_)));
    }

    #[test]
    fn blank_token_is_ignored() {
        let client = ApiClient::new("https://example.com", Some("  ".into()), Duration::from_secs(1)).unwrap();
        assert!(client.auth_token.is_none());
    }

    #[test]
    fn header_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static(" 30 "));
        headers.insert("x-bad", HeaderValue::from_static("soon"));
        let resp: ApiResponse<()> = ApiResponse {
            data: None,
            error_body: None,
            status: 429,
            success: false,
            headers,
        };
        assert_eq!(resp.header_u64("retry-after"), Some(30));
        assert_eq!(resp.header_u64("x-bad"), None);
        assert_eq!(resp.header_u64("missing"), None);
    }
}
