//! # Refresh Scheduler
//!
//! The producer side of the pipeline. On every tick the scheduler fetches the
//! current trends from its [`TrendSource`], ranks them into a new
//! [`Snapshot`], publishes it through [`Store::swap`] and, only when the swap
//! is accepted, hands it to [`Hub::broadcast`].
//!
//! ## Lifecycle
//!
//! `Idle → Fetching → (Publishing → Idle) | (BackoffWait → Fetching)`
//!
//! The current [`SchedulerState`] is published on a `watch` channel. There is
//! no terminal state: the loop runs until its cancellation token fires.
//! Cancellation stops ticking and aborts a backoff wait, but a fetch already
//! in flight is allowed to finish (or hit its own timeout) and a publish is
//! never interrupted.
//!
//! ## Failure handling
//!
//! Every [`FetchError`] is recoverable. Failed fetches are retried after an
//! exponential [`Backoff`] delay, up to `max_retries` times per cycle; after
//! that the cycle gives up and the store keeps serving the previous snapshot.
//! The backoff counter carries over into the next cycle and is only reset by
//! a successful fetch.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::backoff::{Backoff, BackoffPolicy};
use super::hub::Hub;
use super::store::Store;
use crate::ingestors::{FetchError, TrendSource};
use crate::models::{Repository, Snapshot};

/// Shortest tick period the run loop accepts; smaller intervals are raised to it.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    /// Time between cycles, at least [`MIN_INTERVAL`].
    pub interval: Duration,
    /// Bound on a single fetch, including the HTTP round trip and decoding.
    pub fetch_timeout: Duration,
    /// Retries after the first failed attempt of a cycle.
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            fetch_timeout: Duration::from_secs(20),
            max_retries: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Fetching,
    Publishing,
    BackoffWait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A new generation was published and broadcast.
    Published(u64),
    /// The store rejected the snapshot as out of order.
    Stale,
    /// All attempts failed; the previous snapshot stays current.
    Exhausted,
    /// Cancelled during a backoff wait.
    Aborted,
}

/// Summary of one refresh cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub attempts: u32,
    /// Backoff delays waited, in order.
    pub delays: Vec<Duration>,
    pub outcome: CycleOutcome,
    pub last_error: Option<FetchError>,
}

/// # Scheduler
///
/// Owns the refresh loop. Construct it once at startup and move it into its
/// own task with [`Scheduler::run`].
pub struct Scheduler {
    source: Arc<dyn TrendSource>,
    store: Arc<Store>,
    hub: Arc<Hub>,
    config: SchedulerConfig,
    backoff: Backoff,
    state: watch::Sender<SchedulerState>,
}

impl Scheduler {
    pub fn new(source: Arc<dyn TrendSource>, store: Arc<Store>, hub: Arc<Hub>, config: SchedulerConfig) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            source,
            store,
            hub,
            backoff: Backoff::new(config.backoff),
            config,
            state,
        }
    }

    /// Observes state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.send_replace(state);
    }

    /// Runs refresh cycles on the configured interval until `shutdown` is
    /// cancelled. The first cycle starts immediately.
    pub async fn run(mut self, shutdown: CancellationToken) {
        if self.config.interval < MIN_INTERVAL {
            warn!(
                component = "scheduler",
                interval_ms = self.config.interval.as_millis() as u64,
                "interval below minimum, using {:?}",
                MIN_INTERVAL
            );
            self.config.interval = MIN_INTERVAL;
        }
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            component = "scheduler",
            source = self.source.name(),
            interval_secs = self.config.interval.as_secs(),
            "scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.run_cycle(&shutdown).await;
            if report.outcome == CycleOutcome::Aborted {
                break;
            }
        }

        self.set_state(SchedulerState::Idle);
        info!(component = "scheduler", "scheduler stopped");
    }

    /// # Run Cycle
    ///
    /// One fetch-and-publish cycle with retries.
    ///
    /// ## Logic:
    /// 1.  Fetches with `fetch_timeout`. Cancellation is not observed here.
    /// 2.  On failure, waits the next backoff delay (cancellable) and retries,
    ///     up to `max_retries` times.
    /// 3.  On success, resets the backoff, builds generation `current + 1`,
    ///     swaps it into the store and broadcasts it if the swap was accepted.
    pub async fn run_cycle(&mut self, shutdown: &CancellationToken) -> CycleReport {
        let mut report = CycleReport {
            attempts: 0,
            delays: Vec::new(),
            outcome: CycleOutcome::Exhausted,
            last_error: None,
        };

        loop {
            report.attempts += 1;
            self.set_state(SchedulerState::Fetching);

            let fetched = match tokio::time::timeout(self.config.fetch_timeout, self.source.fetch()).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(self.config.fetch_timeout)),
            };

            let err = match fetched {
                Ok(repositories) => {
                    self.backoff.reset();
                    report.outcome = self.publish(repositories);
                    report.last_error = None;
                    self.set_state(SchedulerState::Idle);
                    return report;
                }
                Err(err) => err,
            };

            if report.attempts > self.config.max_retries {
                error!(
                    component = "scheduler",
                    attempts = report.attempts,
                    kind = err.kind(),
                    error = %err,
                    generation = self.store.generation(),
                    "fetch retries exhausted, keeping previous snapshot"
                );
                report.last_error = Some(err);
                report.outcome = CycleOutcome::Exhausted;
                self.set_state(SchedulerState::Idle);
                return report;
            }

            let hint = match &err {
                FetchError::RateLimited { retry_after } => *retry_after,
                _ => None,
            };
            let delay = self.backoff.next_delay(hint);
            warn!(
                component = "scheduler",
                attempt = report.attempts,
                kind = err.kind(),
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "fetch failed, backing off"
            );
            report.last_error = Some(err);
            report.delays.push(delay);

            self.set_state(SchedulerState::BackoffWait);
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    report.outcome = CycleOutcome::Aborted;
                    self.set_state(SchedulerState::Idle);
                    return report;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn publish(&self, repositories: Vec<Repository>) -> CycleOutcome {
        self.set_state(SchedulerState::Publishing);
        let generation = self.store.generation() + 1;
        let snapshot = Snapshot::build(generation, Utc::now(), repositories);

        match self.store.swap(snapshot) {
            Ok(receipt) => {
                let broadcast = self.hub.broadcast(Arc::clone(&receipt.snapshot));
                info!(
                    component = "scheduler",
                    generation,
                    entries = receipt.snapshot.len(),
                    delivered = broadcast.delivered,
                    evicted = broadcast.evicted.len(),
                    "published snapshot"
                );
                CycleOutcome::Published(generation)
            }
            Err(stale) => {
                warn!(component = "scheduler", error = %stale, "snapshot not published");
                CycleOutcome::Stale
            }
        }
    }
}
