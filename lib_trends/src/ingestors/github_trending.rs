//! # GitHub Trending Ingestor
//!
//! GitHub has no official "trending" endpoint, so trends are derived from the
//! search API: repositories created inside a look-back window, sorted by
//! stars, re-scored locally with a gravity formula that favours young,
//! fast-growing projects.
//!
//! Rate limiting is reported as `403` (primary limit, with
//! `x-ratelimit-remaining: 0`) or `429` (secondary limit, usually with
//! `retry-after`). Both map to [`FetchError::RateLimited`] with the best reset
//! hint available so the scheduler can wait long enough.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;

use super::{FetchError, TrendSource};
use crate::models::{trend_score, Repository};
use crate::retrieve::{ApiClient, ApiResponse, RetrieveError};

/// Settings for the GitHub search poller.
#[derive(Debug, Clone)]
pub struct GitHubSourceConfig {
    pub api_url: String,
    /// Only repositories created within this many days are considered.
    pub lookback_days: i64,
    /// Restrict the search to one language.
    pub language: Option<String>,
    /// Results per request; GitHub caps this at 100.
    pub per_page: u32,
    /// Per-request HTTP timeout. The scheduler applies its own, usually
    /// shorter, bound around the whole fetch.
    pub request_timeout: Duration,
}

impl Default for GitHubSourceConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            lookback_days: 7,
            language: None,
            per_page: 100,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    items: Vec<GitHubRepo>,
}

#[derive(Debug, Deserialize)]
struct GitHubOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    id: u64,
    name: String,
    full_name: String,
    owner: GitHubOwner,
    description: Option<String>,
    html_url: String,
    stargazers_count: u64,
    forks_count: u64,
    language: Option<String>,
    created_at: DateTime<Utc>,
}

impl GitHubRepo {
    fn into_repository(self, now: DateTime<Utc>) -> Repository {
        Repository {
            id: self.id,
            owner: self.owner.login,
            name: self.name,
            full_name: self.full_name,
            description: self.description,
            html_url: self.html_url,
            stars: self.stargazers_count,
            forks: self.forks_count,
            language: self.language,
            created_at: self.created_at,
            trend_score: trend_score(self.stargazers_count, self.forks_count, self.created_at, now),
            refreshed_at: now,
        }
    }
}

/// Trend source backed by the GitHub search API.
pub struct GitHubTrendSource {
    client: ApiClient,
    config: GitHubSourceConfig,
}

impl GitHubTrendSource {
    pub fn new(config: GitHubSourceConfig, token: Option<String>) -> Result<Self, RetrieveError> {
        let client = ApiClient::new(&config.api_url, token, config.request_timeout)?;
        Ok(Self { client, config })
    }

    /// The `q` parameter for the search request.
    fn search_query(&self, now: DateTime<Utc>) -> String {
        let since = (now - chrono::Duration::days(self.config.lookback_days.max(1)))
            .format("%Y-%m-%d");
        match self.config.language.as_deref().filter(|l| !l.trim().is_empty()) {
            Some(language) => format!("created:>{since} language:{}", language.trim()),
            None => format!("created:>{since}"),
        }
    }
}

#[async_trait]
impl TrendSource for GitHubTrendSource {
    fn name(&self) -> &str {
        "github"
    }

    async fn fetch(&self) -> Result<Vec<Repository>, FetchError> {
        let now = Utc::now();
        let query = [
            ("q", self.search_query(now)),
            ("sort", "stars".to_string()),
            ("order", "desc".to_string()),
            ("per_page", self.config.per_page.clamp(1, 100).to_string()),
        ];

        let response = self
            .client
            .request::<SearchResponse, ()>(Method::GET, "search/repositories", &query, None, None)
            .await?;

        if !response.success {
            return Err(classify_failure(&response, now));
        }

        let payload = response
            .data
            .ok_or_else(|| FetchError::Decode("empty search response".to_string()))?;
        debug!(source = "github", items = payload.items.len(), "search page received");

        Ok(payload
            .items
            .into_iter()
            .map(|repo| repo.into_repository(now))
            .collect())
    }
}

/// Maps a non-2xx GitHub response to a [`FetchError`].
fn classify_failure<T>(response: &ApiResponse<T>, now: DateTime<Utc>) -> FetchError {
    let body = response.error_body.clone().unwrap_or_default();
    let exhausted = response.header_u64("x-ratelimit-remaining") == Some(0);
    let mentions_limit = body.to_ascii_lowercase().contains("rate limit");

    let rate_limited = response.status == 429 || (response.status == 403 && (exhausted || mentions_limit));
    if !rate_limited {
        return FetchError::Status {
            status: response.status,
            body,
        };
    }

    let retry_after = response
        .header_u64("retry-after")
        .map(Duration::from_secs)
        .or_else(|| {
            response.header_u64("x-ratelimit-reset").map(|reset| {
                let wait = (reset as i64 - now.timestamp()).max(0);
                Duration::from_secs(wait as u64)
            })
        });

    FetchError::RateLimited { retry_after }
}
