//! # Digest Notifier
//!
//! Periodically turns the current snapshot into per-subscriber digests and
//! hands them to an [`EmailTransport`]. The notifier only decides *who* gets
//! *what*; delivery details live behind the transport.
//!
//! A run never blocks the scheduler or the hub: it reads the store through a
//! single snapshot load and everything else happens in its own task.
//! Repositories are remembered per subscriber once a digest containing them
//! was accepted by the transport, so the same repository is not mailed twice.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::scheduler::MIN_INTERVAL;
use super::store::Store;
use crate::mailers::{EmailTransport, TransportError};
use crate::models::{Digest, Snapshot, Subscriber};
use crate::subscribers::SubscriberSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifierConfig {
    /// Time between runs. The first run happens one interval after start.
    pub interval: Duration,
    /// Repositories per digest.
    pub digest_size: usize,
    /// Delivery attempts per digest, including the first.
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub send_timeout: Duration,
    /// Digests in flight at once.
    pub concurrency: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            digest_size: 10,
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            send_timeout: Duration::from_secs(15),
            concurrency: 4,
        }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DigestReport {
    pub generation: u64,
    pub sent: usize,
    /// Subscribers with no new matching repositories.
    pub skipped: usize,
    /// Subscribers whose digest failed on every attempt.
    pub failed: usize,
}

pub struct Notifier {
    store: Arc<Store>,
    subscribers: Arc<dyn SubscriberSource>,
    transport: Arc<dyn EmailTransport>,
    config: NotifierConfig,
    /// Repository ids already delivered, keyed by subscriber email.
    notified: Mutex<HashMap<String, HashSet<u64>>>,
}

impl Notifier {
    pub fn new(
        store: Arc<Store>,
        subscribers: Arc<dyn SubscriberSource>,
        transport: Arc<dyn EmailTransport>,
        config: NotifierConfig,
    ) -> Self {
        Self {
            store,
            subscribers,
            transport,
            config,
            notified: Mutex::new(HashMap::new()),
        }
    }

    fn notified(&self) -> MutexGuard<'_, HashMap<String, HashSet<u64>>> {
        self.notified.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs digests every `interval` until `shutdown` is cancelled. A run in
    /// progress is abandoned on cancellation; nothing is recorded for digests
    /// that were not acknowledged.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let period = self.config.interval.max(MIN_INTERVAL);
        if period != self.config.interval {
            warn!(component = "notifier", "digest interval below minimum, using {:?}", period);
        }
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            component = "notifier",
            transport = self.transport.name(),
            interval_secs = period.as_secs(),
            "notifier started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                report = self.run_once() => {
                    info!(
                        component = "notifier",
                        generation = report.generation,
                        sent = report.sent,
                        skipped = report.skipped,
                        failed = report.failed,
                        "digest run finished"
                    );
                }
            }
        }
        info!(component = "notifier", "notifier stopped");
    }

    /// # Run Once
    ///
    /// ## Logic:
    /// 1.  Loads the current snapshot once; generation 0 sends nothing.
    /// 2.  For every subscriber, takes the repositories matching its filter
    ///     in rank order, minus those already delivered to it, up to
    ///     `digest_size`.
    /// 3.  Delivers the non-empty digests with bounded concurrency, each with
    ///     its own retries. One subscriber's failure never affects another's.
    pub async fn run_once(&self) -> DigestReport {
        let snapshot = self.store.current_snapshot();
        let mut report = DigestReport {
            generation: snapshot.generation(),
            ..Default::default()
        };
        if snapshot.generation() == 0 {
            debug!(component = "notifier", "no snapshot published yet, skipping run");
            return report;
        }

        let subscribers = self.subscribers.subscribers().await;
        let digests: Vec<Digest> = subscribers
            .iter()
            .filter_map(|subscriber| {
                let digest = self.compose(&snapshot, subscriber);
                if digest.is_none() {
                    report.skipped += 1;
                }
                digest
            })
            .collect();

        let outcomes: Vec<bool> = stream::iter(digests)
            .map(|digest| self.deliver(digest))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for delivered in outcomes {
            if delivered {
                report.sent += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }

    /// The digest for one subscriber, or `None` if nothing new matches.
    pub fn compose(&self, snapshot: &Snapshot, subscriber: &Subscriber) -> Option<Digest> {
        let notified = self.notified();
        let seen = notified.get(&subscriber.email);
        let repositories: Vec<_> = snapshot
            .matching(&subscriber.filter)
            .filter(|repo| !seen.is_some_and(|ids| ids.contains(&repo.id)))
            .take(self.config.digest_size)
            .cloned()
            .collect();
        drop(notified);

        if repositories.is_empty() {
            return None;
        }
        Some(Digest {
            recipient: subscriber.email.clone(),
            unsubscribe_token: subscriber.token.clone(),
            generation: snapshot.generation(),
            generated_at: snapshot.created_at(),
            repositories,
        })
    }

    /// Sends one digest with retries. Its ids are recorded on success unless
    /// the transport only logs.
    async fn deliver(&self, digest: Digest) -> bool {
        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            let result = tokio::time::timeout(self.config.send_timeout, self.transport.send(&digest))
                .await
                .unwrap_or(Err(TransportError::Timeout(self.config.send_timeout)));

            match result {
                Ok(()) => {
                    if self.transport.delivers() {
                        self.notified()
                            .entry(digest.recipient.clone())
                            .or_default()
                            .extend(digest.ids());
                    }
                    debug!(
                        component = "notifier",
                        recipient = %digest.recipient,
                        repositories = digest.repositories.len(),
                        attempt,
                        "digest delivered"
                    );
                    return true;
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        component = "notifier",
                        recipient = %digest.recipient,
                        attempt,
                        error = %e,
                        "digest delivery failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => {
                    warn!(
                        component = "notifier",
                        recipient = %digest.recipient,
                        attempts,
                        error = %e,
                        "digest delivery failed, giving up"
                    );
                }
            }
        }
        false
    }

    /// Forgets everything delivered to `email`, e.g. after unsubscribing.
    pub fn forget(&self, email: &str) {
        self.notified().remove(email);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::repo;
    use crate::models::RepositoryFilter;
    use crate::subscribers::SubscriberStore;
    use async_trait::async_trait;
    use chrono::Utc;

    /// Records delivered digests; fails every send to addresses in `failing`
    /// a configured number of times.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Digest>>,
        failures_left: Mutex<HashMap<String, u32>>,
        attempts: Mutex<HashMap<String, u32>>,
    }

    impl RecordingTransport {
        fn failing(email: &str, times: u32) -> Self {
            let transport = Self::default();
            transport.failures_left.lock().unwrap().insert(email.to_string(), times);
            transport
        }

        fn sent_to(&self, email: &str) -> Vec<Digest> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|d| d.recipient == email)
                .cloned()
                .collect()
        }

        fn attempts(&self, email: &str) -> u32 {
            self.attempts.lock().unwrap().get(email).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl EmailTransport for RecordingTransport {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, digest: &Digest) -> Result<(), TransportError> {
            *self.attempts.lock().unwrap().entry(digest.recipient.clone()).or_default() += 1;
            let mut failures = self.failures_left.lock().unwrap();
            if let Some(left) = failures.get_mut(&digest.recipient) {
                if *left > 0 {
                    *left -= 1;
                    return Err(TransportError::Rejected {
                        status: 503,
                        body: "unavailable".into(),
                    });
                }
            }
            drop(failures);
            self.sent.lock().unwrap().push(digest.clone());
            Ok(())
        }
    }

    fn store_with(generation: u64, repos: Vec<crate::models::Repository>) -> Arc<Store> {
        let store = Arc::new(Store::new());
        store.swap(Snapshot::build(generation, Utc::now(), repos)).unwrap();
        store
    }

    fn notifier(store: Arc<Store>, subscribers: Arc<SubscriberStore>, transport: Arc<RecordingTransport>) -> Notifier {
        Notifier::new(store, subscribers, transport, NotifierConfig::default())
    }

    #[tokio::test]
    async fn go_subscriber_receives_only_go_repositories() {
        let store = store_with(
            1,
            vec![
                repo(1, 9.0, Some("Rust")),
                repo(2, 8.0, Some("Go")),
                repo(3, 7.0, Some("Python")),
                repo(4, 6.0, Some("go")),
            ],
        );
        let subscribers = Arc::new(SubscriberStore::new());
        subscribers.subscribe("gopher@example.com", RepositoryFilter::language("Go")).unwrap();
        let transport = Arc::new(RecordingTransport::default());

        let report = notifier(store, subscribers, Arc::clone(&transport)).run_once().await;
        assert_eq!(report.sent, 1);

        let digests = transport.sent_to("gopher@example.com");
        assert_eq!(digests.len(), 1);
        assert_eq!(digests[0].ids(), vec![2, 4]);
        assert!(digests[0].repositories.iter().all(|r| r.has_language("Go")));
    }

    #[tokio::test]
    async fn empty_store_sends_nothing() {
        let subscribers = Arc::new(SubscriberStore::new());
        subscribers.subscribe("a@example.com", RepositoryFilter::default()).unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let notifier = notifier(Arc::new(Store::new()), subscribers, Arc::clone(&transport));

        assert_eq!(notifier.run_once().await, DigestReport::default());
        assert_eq!(transport.attempts("a@example.com"), 0);
    }

    #[tokio::test]
    async fn already_notified_repositories_are_not_resent() {
        let store = store_with(1, vec![repo(1, 2.0, None), repo(2, 1.0, None)]);
        let subscribers = Arc::new(SubscriberStore::new());
        subscribers.subscribe("a@example.com", RepositoryFilter::default()).unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let notifier = notifier(Arc::clone(&store), subscribers, Arc::clone(&transport));

        assert_eq!(notifier.run_once().await.sent, 1);
        let second = notifier.run_once().await;
        assert_eq!((second.sent, second.skipped), (0, 1));

        store
            .swap(Snapshot::build(2, Utc::now(), vec![repo(1, 2.0, None), repo(3, 5.0, None)]))
            .unwrap();
        assert_eq!(notifier.run_once().await.sent, 1);
        let digests = transport.sent_to("a@example.com");
        assert_eq!(digests.len(), 2);
        assert_eq!(digests[1].ids(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_transport_is_retried_without_blocking_others() {
        let store = store_with(1, vec![repo(1, 1.0, None)]);
        let subscribers = Arc::new(SubscriberStore::new());
        subscribers.subscribe("flaky@example.com", RepositoryFilter::default()).unwrap();
        subscribers.subscribe("down@example.com", RepositoryFilter::default()).unwrap();
        subscribers.subscribe("ok@example.com", RepositoryFilter::default()).unwrap();

        let transport = RecordingTransport::failing("flaky@example.com", 2);
        transport.failures_left.lock().unwrap().insert("down@example.com".into(), u32::MAX);
        let transport = Arc::new(transport);
        let notifier = notifier(store, subscribers, Arc::clone(&transport));

        let report = notifier.run_once().await;
        assert_eq!((report.sent, report.failed, report.skipped), (2, 1, 0));
        assert_eq!(transport.attempts("flaky@example.com"), 3);
        assert_eq!(transport.attempts("down@example.com"), 3);
        assert_eq!(transport.sent_to("ok@example.com").len(), 1);

        // A failed digest is not recorded, so the next run tries again.
        assert_eq!(notifier.run_once().await.failed, 1);
    }

    #[tokio::test]
    async fn digest_is_capped_at_configured_size() {
        let store = store_with(1, (1..=25).map(|id| repo(id, id as f64, None)).collect());
        let subscribers = Arc::new(SubscriberStore::new());
        subscribers.subscribe("a@example.com", RepositoryFilter::default()).unwrap();
        let transport = Arc::new(RecordingTransport::default());
        notifier(store, subscribers, Arc::clone(&transport)).run_once().await;

        let digest = &transport.sent_to("a@example.com")[0];
        assert_eq!(digest.repositories.len(), 10);
        assert_eq!(digest.repositories[0].id, 25);
    }

    #[tokio::test(start_paused = true)]
    async fn first_run_waits_one_interval() {
        let store = store_with(1, vec![repo(1, 1.0, None)]);
        let subscribers = Arc::new(SubscriberStore::new());
        subscribers.subscribe("a@example.com", RepositoryFilter::default()).unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let notifier = Arc::new(Notifier::new(
            store,
            subscribers,
            Arc::clone(&transport) as Arc<dyn EmailTransport>,
            NotifierConfig {
                interval: Duration::from_secs(60),
                ..Default::default()
            },
        ));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&notifier).run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(transport.attempts("a@example.com"), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.attempts("a@example.com"), 1);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn log_only_transport_does_not_mark_repositories_delivered() {
        let store = store_with(1, vec![repo(1, 2.0, None), repo(2, 1.0, None)]);
        let subscribers = Arc::new(SubscriberStore::new());
        subscribers.subscribe("a@example.com", RepositoryFilter::default()).unwrap();
        let notifier = Notifier::new(
            Arc::clone(&store),
            subscribers,
            Arc::new(crate::mailers::LogTransport),
            NotifierConfig::default(),
        );

        assert_eq!(notifier.run_once().await.sent, 1);
        // Nothing left the process, so the same repositories are offered again.
        let report = notifier.run_once().await;
        assert_eq!((report.sent, report.skipped), (1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_runs_at_the_minimum_period() {
        let store = store_with(1, vec![repo(1, 1.0, None)]);
        let subscribers = Arc::new(SubscriberStore::new());
        subscribers.subscribe("a@example.com", RepositoryFilter::default()).unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let notifier = Arc::new(Notifier::new(
            store,
            subscribers,
            Arc::clone(&transport) as Arc<dyn EmailTransport>,
            NotifierConfig {
                interval: Duration::ZERO,
                ..Default::default()
            },
        ));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&notifier).run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(transport.attempts("a@example.com"), 1);

        shutdown.cancel();
        task.await.unwrap();
    }
}
