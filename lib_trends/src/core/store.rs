//! # Snapshot Store
//!
//! The single authoritative holder of the current ranked [`Snapshot`].
//!
//! ## Core Design Principles:
//!
//! 1.  **Wait-free reads**: readers perform one atomic pointer load through
//!     `ArcSwap` and then work on an immutable snapshot. The cost of a read
//!     does not depend on how many other readers are active, and a reader can
//!     never block the publisher.
//!
//! 2.  **One pointer, one generation**: the current and the previous snapshot
//!     live together in an immutable `StoreState` pair. A swap replaces the
//!     whole pair with a single compare-and-swap, so `stats()` always compares
//!     two snapshots that were actually adjacent.
//!
//! 3.  **Monotonic generations**: a swap whose generation is not strictly
//!     greater than the current one is rejected with [`StaleSwapError`] and
//!     leaves the store untouched.

use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{Listing, Page, Repository, RepositoryFilter, Snapshot, Stats};

/// Rejection of an out-of-order publish. Non-fatal: the store keeps serving
/// the current generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stale snapshot: generation {offered} is not newer than current generation {current}")]
pub struct StaleSwapError {
    pub offered: u64,
    pub current: u64,
}

/// Proof of an accepted swap.
#[derive(Debug, Clone)]
pub struct SwapReceipt {
    pub generation: u64,
    pub previous_generation: u64,
    /// The snapshot that is now current.
    pub snapshot: Arc<Snapshot>,
}

/// The immutable `{current, previous}` pair behind the store's pointer.
#[derive(Debug)]
struct StoreState {
    current: Arc<Snapshot>,
    previous: Option<Arc<Snapshot>>,
}

/// # Store
///
/// Shared behind `Arc` by the scheduler (the only writer), the HTTP handlers,
/// the hub's registration path and the notifier.
#[derive(Debug)]
pub struct Store {
    state: ArcSwap<StoreState>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// A store holding the empty generation-0 snapshot.
    pub fn new() -> Self {
        Self::with_snapshot(Snapshot::empty())
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            state: ArcSwap::from_pointee(StoreState {
                current: Arc::new(snapshot),
                previous: None,
            }),
        }
    }

    /// The latest published snapshot.
    pub fn current_snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.state.load().current)
    }

    /// The snapshot superseded by the last accepted swap.
    pub fn previous_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.state.load().previous.clone()
    }

    pub fn generation(&self) -> u64 {
        self.state.load().current.generation()
    }

    /// # Swap
    ///
    /// Atomically publishes `snapshot` as the current generation.
    ///
    /// ## Logic:
    /// 1.  Loads the current pair and checks the offered generation against it.
    /// 2.  Builds the next pair (`offered`, old current) and attempts a
    ///     compare-and-swap against the loaded pointer.
    /// 3.  If another writer won the race the loop re-reads and re-checks, so
    ///     two racing swaps can never both succeed with the same generation.
    pub fn swap(&self, snapshot: Snapshot) -> Result<SwapReceipt, StaleSwapError> {
        let offered = Arc::new(snapshot);
        let mut loaded = self.state.load();

        loop {
            let current = loaded.current.generation();
            if offered.generation() <= current {
                warn!(
                    component = "store",
                    offered = offered.generation(),
                    current,
                    "rejected stale snapshot"
                );
                return Err(StaleSwapError {
                    offered: offered.generation(),
                    current,
                });
            }

            let next = Arc::new(StoreState {
                current: Arc::clone(&offered),
                previous: Some(Arc::clone(&loaded.current)),
            });
            let witnessed = self.state.compare_and_swap(&*loaded, next);
            if Arc::ptr_eq(&*witnessed, &*loaded) {
                debug!(
                    component = "store",
                    generation = offered.generation(),
                    previous = current,
                    entries = offered.len(),
                    "snapshot published"
                );
                return Ok(SwapReceipt {
                    generation: offered.generation(),
                    previous_generation: current,
                    snapshot: offered,
                });
            }
            loaded = witnessed;
        }
    }

    pub fn get(&self, id: u64) -> Option<Arc<Repository>> {
        self.state.load().current.get(id)
    }

    /// One page of the current snapshot. The listing carries the generation
    /// it was computed from.
    pub fn list(&self, filter: &RepositoryFilter, page: Page) -> Listing {
        self.state.load().current.list(filter, page)
    }

    /// Aggregates over the current snapshot, compared with its predecessor.
    pub fn stats(&self) -> Stats {
        let state = self.state.load();
        state.current.stats(state.previous.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::repo;
    use chrono::Utc;

    fn snapshot(generation: u64, entries: &[(u64, f64)]) -> Snapshot {
        Snapshot::build(
            generation,
            Utc::now(),
            entries.iter().map(|&(id, score)| repo(id, score, None)).collect(),
        )
    }

    #[test]
    fn starts_empty_at_generation_zero() {
        let store = Store::new();
        assert_eq!(store.generation(), 0);
        assert!(store.current_snapshot().is_empty());
        assert!(store.previous_snapshot().is_none());
        assert_eq!(store.list(&RepositoryFilter::default(), Page::default()).total, 0);
    }

    #[test]
    fn swap_tracks_previous_generation() {
        let store = Store::new();
        let receipt = store.swap(snapshot(1, &[(1, 1.0)])).unwrap();
        assert_eq!((receipt.generation, receipt.previous_generation), (1, 0));

        store.swap(snapshot(2, &[(1, 1.0), (2, 3.0)])).unwrap();
        assert_eq!(store.generation(), 2);
        assert_eq!(store.previous_snapshot().map(|s| s.generation()), Some(1));

        let stats = store.stats();
        assert_eq!(stats.previous_generation, Some(1));
        assert_eq!(stats.new_since_previous, 1);
    }

    #[test]
    fn stale_and_duplicate_generations_are_rejected() {
        let store = Store::new();
        store.swap(snapshot(3, &[(1, 1.0)])).unwrap();

        let dup = store.swap(snapshot(3, &[(9, 9.0)])).unwrap_err();
        assert_eq!(dup, StaleSwapError { offered: 3, current: 3 });
        let old = store.swap(snapshot(2, &[(9, 9.0)])).unwrap_err();
        assert_eq!(old.offered, 2);

        assert_eq!(store.generation(), 3);
        assert!(store.get(9).is_none());
        assert!(store.get(1).is_some());
        assert_eq!(store.previous_snapshot().map(|s| s.generation()), Some(0));
    }

    #[test]
    fn racing_writers_publish_each_generation_once() {
        let store = Arc::new(Store::new());
        let accepted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let store = Arc::clone(&store);
                    scope.spawn(move || {
                        (1..=50)
                            .filter(|&g| store.swap(snapshot(g, &[(g, 1.0)])).is_ok())
                            .count()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(store.generation(), 50);
        // Every generation can be accepted at most once across all writers.
        assert!(accepted <= 50);
        assert!(accepted >= 1);
    }

    #[test]
    fn readers_never_observe_mixed_generations() {
        // In generation g every entry has score g, so a listing mixing two
        // generations would show two different scores.
        fn uniform(generation: u64) -> Snapshot {
            Snapshot::build(
                generation,
                Utc::now(),
                (1..=20).map(|id| repo(id, generation as f64, None)).collect(),
            )
        }

        let store = Arc::new(Store::with_snapshot(uniform(1)));
        std::thread::scope(|scope| {
            let writer = Arc::clone(&store);
            scope.spawn(move || {
                for g in 2..=300 {
                    writer.swap(uniform(g)).unwrap();
                }
            });

            for _ in 0..3 {
                let reader = Arc::clone(&store);
                scope.spawn(move || {
                    for _ in 0..300 {
                        let listing = reader.list(&RepositoryFilter::default(), Page::all());
                        assert_eq!(listing.total, 20);
                        for item in &listing.items {
                            assert_eq!(item.trend_score, listing.generation as f64);
                        }

                        let stats = reader.stats();
                        if let Some(prev) = stats.previous_generation {
                            assert_eq!(prev + 1, stats.generation);
                        }
                    }
                });
            }
        });

        assert_eq!(store.generation(), 300);
    }
}
