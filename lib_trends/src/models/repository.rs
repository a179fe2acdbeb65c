use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// # Repository
///
/// One tracked repository as it appears in a published snapshot. Instances
/// are shared behind `Arc` once a snapshot is built and are never mutated
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    /// The upstream numeric id, unique within a snapshot.
    pub id: u64,
    /// Owner login (user or organisation).
    pub owner: String,
    /// Repository name without the owner.
    pub name: String,
    /// `owner/name`.
    pub full_name: String,
    pub description: Option<String>,
    pub html_url: String,
    pub stars: u64,
    pub forks: u64,
    /// Primary language as reported by the upstream API.
    pub language: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Gravity score used for ranking, see [`trend_score`].
    pub trend_score: f64,
    /// When this entry was fetched.
    pub refreshed_at: DateTime<Utc>,
}

impl Repository {
    /// Case-insensitive language comparison. A repository without a language
    /// never matches.
    pub fn has_language(&self, language: &str) -> bool {
        self.language
            .as_deref()
            .is_some_and(|l| l.eq_ignore_ascii_case(language))
    }
}

/// Computes the gravity score of a repository at `now`.
///
/// `(stars + 2 * forks) / (age_hours + 2)^1.5 * 100`. Young repositories with
/// many stars rank above old, large ones. A creation time in the future is
/// treated as age zero.
pub fn trend_score(stars: u64, forks: u64, created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_hours = ((now - created_at).num_seconds().max(0) as f64) / 3600.0;
    let points = stars as f64 + 2.0 * forks as f64;
    points / (age_hours + 2.0).powf(1.5) * 100.0
}
