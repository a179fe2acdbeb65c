//! # Ranked Snapshots
//!
//! A [`Snapshot`] is one immutable, fully-ranked view of every tracked
//! repository at a given generation. The constructor is the only place that
//! orders entries: trend score descending, ties broken by id ascending, with
//! duplicate ids collapsed to their best-scored entry. Once built, a snapshot
//! is shared behind `Arc` and never mutated; a newer generation replaces it
//! wholesale.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::filter::RepositoryFilter;
use super::repository::Repository;

/// Default page size for listings.
pub const DEFAULT_PER_PAGE: usize = 25;
/// Upper bound on the page size a caller may request.
pub const MAX_PER_PAGE: usize = 100;

#[derive(Debug)]
pub struct Snapshot {
    generation: u64,
    created_at: DateTime<Utc>,
    repositories: Vec<Arc<Repository>>,
    index: HashMap<u64, usize>,
}

impl Snapshot {
    /// The generation-0 snapshot a store starts with.
    pub fn empty() -> Self {
        Self {
            generation: 0,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            repositories: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Ranks `repositories` and freezes them under `generation`.
    pub fn build(generation: u64, created_at: DateTime<Utc>, repositories: Vec<Repository>) -> Self {
        let mut ranked = repositories;
        ranked.sort_by(rank_order);

        // After sorting, the first occurrence of an id is its best entry.
        let mut seen = HashSet::with_capacity(ranked.len());
        ranked.retain(|repo| seen.insert(repo.id));

        let repositories: Vec<Arc<Repository>> = ranked.into_iter().map(Arc::new).collect();
        let index = repositories
            .iter()
            .enumerate()
            .map(|(pos, repo)| (repo.id, pos))
            .collect();

        Self {
            generation,
            created_at,
            repositories,
            index,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Entries in rank order.
    pub fn repositories(&self) -> &[Arc<Repository>] {
        &self.repositories
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<Arc<Repository>> {
        self.index
            .get(&id)
            .map(|&pos| Arc::clone(&self.repositories[pos]))
    }

    /// Entries matching `filter`, in rank order.
    pub fn matching<'a>(
        &'a self,
        filter: &'a RepositoryFilter,
    ) -> impl Iterator<Item = &'a Arc<Repository>> + 'a {
        self.repositories.iter().filter(move |repo| filter.matches(repo))
    }

    /// One page of the entries matching `filter`.
    pub fn list(&self, filter: &RepositoryFilter, page: Page) -> Listing {
        let page = page.clamped();
        let matching: Vec<&Arc<Repository>> = self.matching(filter).collect();
        let total = matching.len();
        let items = matching
            .into_iter()
            .skip((page.page - 1).saturating_mul(page.per_page))
            .take(page.per_page)
            .cloned()
            .collect();

        Listing {
            generation: self.generation,
            refreshed_at: self.created_at,
            total,
            page: page.page,
            per_page: page.per_page,
            items,
        }
    }

    /// Aggregate counters. `previous` is the snapshot this one superseded, if any.
    pub fn stats(&self, previous: Option<&Snapshot>) -> Stats {
        let mut languages: BTreeMap<String, usize> = BTreeMap::new();
        let mut total_stars = 0u64;
        let mut total_forks = 0u64;
        for repo in &self.repositories {
            total_stars += repo.stars;
            total_forks += repo.forks;
            if let Some(ref language) = repo.language {
                *languages.entry(language.clone()).or_default() += 1;
            }
        }

        // Highest count wins; BTreeMap order makes ties resolve alphabetically.
        let top_language = languages
            .iter()
            .fold(None::<(&String, usize)>, |best, (lang, &count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((lang, count)),
            })
            .map(|(lang, _)| lang.clone());

        let new_since_previous = match previous {
            Some(prev) => self
                .repositories
                .iter()
                .filter(|repo| prev.get(repo.id).is_none())
                .count(),
            None => self.repositories.len(),
        };

        Stats {
            generation: self.generation,
            refreshed_at: self.created_at,
            total_repositories: self.repositories.len(),
            total_stars,
            total_forks,
            languages,
            top_language,
            previous_generation: previous.map(Snapshot::generation),
            new_since_previous,
        }
    }
}

/// Score descending, then id ascending.
fn rank_order(a: &Repository, b: &Repository) -> Ordering {
    b.trend_score
        .total_cmp(&a.trend_score)
        .then_with(|| a.id.cmp(&b.id))
}

/// 1-based pagination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: usize,
    pub per_page: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl Page {
    pub fn new(page: usize, per_page: usize) -> Self {
        Self { page, per_page }
    }

    /// A page large enough to hold every entry of a snapshot.
    pub fn all() -> Self {
        Self {
            page: 1,
            per_page: usize::MAX,
        }
    }

    fn clamped(self) -> Self {
        let per_page = if self.per_page == usize::MAX {
            usize::MAX
        } else {
            self.per_page.clamp(1, MAX_PER_PAGE)
        };
        Self {
            page: self.page.max(1),
            per_page,
        }
    }
}

/// One page of a listing, computed from a single generation.
#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub generation: u64,
    pub refreshed_at: DateTime<Utc>,
    /// Number of entries matching the filter across all pages.
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub items: Vec<Arc<Repository>>,
}

impl Listing {
    pub fn ids(&self) -> Vec<u64> {
        self.items.iter().map(|repo| repo.id).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub generation: u64,
    pub refreshed_at: DateTime<Utc>,
    pub total_repositories: usize,
    pub total_stars: u64,
    pub total_forks: u64,
    pub languages: BTreeMap<String, usize>,
    pub top_language: Option<String>,
    pub previous_generation: Option<u64>,
    /// Entries whose id was absent from the previous generation.
    pub new_since_previous: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::repo;

    #[test]
    fn ranks_by_score_then_id() {
        let snap = Snapshot::build(
            1,
            Utc::now(),
            vec![repo(3, 5.0, None), repo(2, 9.0, None), repo(1, 5.0, None)],
        );
        let ids: Vec<u64> = snap.repositories().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn duplicate_ids_keep_best_entry() {
        let snap = Snapshot::build(1, Utc::now(), vec![repo(1, 2.0, None), repo(1, 8.0, None)]);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.get(1).map(|r| r.trend_score), Some(8.0));
    }

    #[test]
    fn pagination_and_clamping() {
        let repos = (1..=30).map(|id| repo(id, 100.0 - id as f64, None)).collect();
        let snap = Snapshot::build(4, Utc::now(), repos);
        let all = RepositoryFilter::default();

        let second = snap.list(&all, Page::new(2, 10));
        assert_eq!(second.total, 30);
        assert_eq!(second.ids(), (11..=20).collect::<Vec<_>>());
        assert_eq!(second.generation, 4);

        let zero = snap.list(&all, Page::new(0, 0));
        assert_eq!(zero.page, 1);
        assert_eq!(zero.per_page, 1);
        assert_eq!(zero.ids(), vec![1]);

        let beyond = snap.list(&all, Page::new(9, 10));
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.total, 30);
    }

    #[test]
    fn stats_count_languages_and_new_entries() {
        let previous = Snapshot::build(1, Utc::now(), vec![repo(1, 1.0, Some("Go"))]);
        let current = Snapshot::build(
            2,
            Utc::now(),
            vec![
                repo(1, 3.0, Some("Go")),
                repo(2, 2.0, Some("Rust")),
                repo(3, 1.0, Some("Rust")),
                repo(4, 0.5, None),
            ],
        );
        let stats = current.stats(Some(&previous));
        assert_eq!(stats.total_repositories, 4);
        assert_eq!(stats.total_stars, 100);
        assert_eq!(stats.languages.get("Rust"), Some(&2));
        assert_eq!(stats.top_language.as_deref(), Some("Rust"));
        assert_eq!(stats.previous_generation, Some(1));
        assert_eq!(stats.new_since_previous, 3);
    }

    #[test]
    fn empty_snapshot_is_generation_zero() {
        let snap = Snapshot::empty();
        assert_eq!(snap.generation(), 0);
        assert!(snap.is_empty());
        assert!(snap.stats(None).top_language.is_none());
    }
}
