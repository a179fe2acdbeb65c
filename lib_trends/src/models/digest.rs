use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::repository::Repository;

/// # Digest
///
/// One subscriber's share of a notifier run: the top new matches from a
/// single snapshot generation, addressed and ready for a mail transport.
#[derive(Debug, Clone, Serialize)]
pub struct Digest {
    pub recipient: String,
    /// Token for the unsubscribe link.
    pub unsubscribe_token: String,
    pub generation: u64,
    pub generated_at: DateTime<Utc>,
    pub repositories: Vec<Arc<Repository>>,
}

impl Digest {
    pub fn subject(&self) -> String {
        match self.repositories.len() {
            1 => "1 new trending repository".to_string(),
            n => format!("{n} new trending repositories"),
        }
    }

    /// Plain-text body, one repository per line in rank order.
    pub fn text_body(&self) -> String {
        let mut body = String::from("Trending on GitHub right now:\n\n");
        for (rank, repo) in self.repositories.iter().enumerate() {
            let _ = writeln!(
                body,
                "{}. {} ({} stars, {}) {}",
                rank + 1,
                repo.full_name,
                repo.stars,
                repo.language.as_deref().unwrap_or("unknown"),
                repo.html_url
            );
        }
        let _ = write!(
            body,
            "\nUnsubscribe token: {}\n",
            self.unsubscribe_token
        );
        body
    }

    pub fn ids(&self) -> Vec<u64> {
        self.repositories.iter().map(|r| r.id).collect()
    }
}
