//! # Data Ingestors Module
//!
//! Trend sources feeding the scheduler. Each source hides the protocol details
//! of one upstream behind the [`TrendSource`] trait, so the scheduler only
//! sees a list of scored repositories or a classified [`FetchError`].
//!
//! ## Contained Modules:
//! - **`github_trending`**: polls the GitHub search API for recently created,
//!   most-starred repositories and scores them.

#![forbid(unsafe_code)]

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::Repository;
use crate::retrieve::RetrieveError;

/// The GitHub search API poller.
pub mod github_trending;

pub use github_trending::{GitHubSourceConfig, GitHubTrendSource};

/// A fetch failure. Every variant is recoverable: the scheduler backs off and
/// keeps serving the previous snapshot.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// 403/429 from the upstream. `retry_after` carries the reset hint when
    /// the upstream provided one.
    #[error("rate limited by upstream (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode upstream payload: {0}")]
    Decode(String),
}

impl FetchError {
    /// Short label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "network",
            FetchError::Timeout(_) => "timeout",
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::Status { .. } => "status",
            FetchError::Decode(_) => "decode",
        }
    }
}

impl From<RetrieveError> for FetchError {
    fn from(err: RetrieveError) -> Self {
        match err {
            RetrieveError::Decode(msg) => FetchError::Decode(msg),
            other => FetchError::Network(other.to_string()),
        }
    }
}

/// Something that can produce the current list of trending repositories.
///
/// Implementations return scored but unranked entries; ranking and
/// generation numbering belong to the snapshot builder.
#[async_trait]
pub trait TrendSource: Send + Sync {
    /// Human readable name for logs.
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<Repository>, FetchError>;
}
