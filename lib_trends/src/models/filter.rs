use serde::{Deserialize, Serialize};

use super::repository::Repository;

/// Filter criteria for repositories.
///
/// Used by `/trends` listings, by live WebSocket clients and by digest
/// subscribers. Every field is optional and an empty filter matches all
/// repositories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryFilter {
    /// Exact primary language, compared case-insensitively.
    pub language: Option<String>,
    pub min_stars: Option<u64>,
    /// Case-insensitive substring of `full_name` or `description`.
    pub query: Option<String>,
}

impl RepositoryFilter {
    /// Filter on a single language.
    pub fn language(language: impl Into<String>) -> Self {
        Self {
            language: Some(language.into()),
            ..Default::default()
        }
    }

    /// Drops blank fields so that `?language=` behaves like no filter at all.
    pub fn normalized(self) -> Self {
        fn keep(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }
        Self {
            language: keep(self.language),
            min_stars: self.min_stars,
            query: keep(self.query),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.language.is_none() && self.min_stars.is_none() && self.query.is_none()
    }

    pub fn matches(&self, repo: &Repository) -> bool {
        if let Some(ref language) = self.language {
            if !repo.has_language(language) {
                return false;
            }
        }
        if let Some(min) = self.min_stars {
            if repo.stars < min {
                return false;
            }
        }
        if let Some(ref query) = self.query {
            let needle = query.to_lowercase();
            let in_name = repo.full_name.to_lowercase().contains(&needle);
            let in_description = repo
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&needle));
            if !in_name && !in_description {
                return false;
            }
        }
        true
    }
}
