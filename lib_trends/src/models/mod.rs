//! # Data Model
//!
//! Plain data types shared by every layer of the pipeline. Nothing in here
//! performs I/O; the types are serializable so the HTTP and WebSocket layers
//! can hand them out directly.

/// Per-subscriber digest payloads.
pub mod digest;
/// Filter criteria shared by listings, live clients and subscribers.
pub mod filter;
/// A single ranked repository and its trend score.
pub mod repository;
/// Immutable, ranked views of all tracked repositories.
pub mod snapshot;
/// Digest subscribers.
pub mod subscriber;

pub use digest::Digest;
pub use filter::RepositoryFilter;
pub use repository::{trend_score, Repository};
pub use snapshot::{Listing, Page, Snapshot, Stats};
pub use subscriber::Subscriber;

#[cfg(test)]
pub(crate) mod testing {
    use chrono::{TimeZone, Utc};

    use super::Repository;

    /// A repository with a fixed score. Stars are `id * 10` and forks `id`.
    pub(crate) fn repo(id: u64, score: f64, language: Option<&str>) -> Repository {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Repository {
            id,
            owner: "acme".to_string(),
            name: format!("repo-{id}"),
            full_name: format!("acme/repo-{id}"),
            description: None,
            html_url: format!("https://github.com/acme/repo-{id}"),
            stars: id * 10,
            forks: id,
            language: language.map(str::to_string),
            created_at: created,
            trend_score: score,
            refreshed_at: created,
        }
    }
}
