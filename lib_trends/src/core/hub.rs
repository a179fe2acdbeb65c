//! # Broadcast Hub
//!
//! The `Hub` fans every published snapshot out to all live clients (WebSocket
//! sessions in the server) without letting one client's slowness reach the
//! publisher or the other clients.
//!
//! ## Core Design Principles:
//!
//! 1.  **Zero-copy fan-out**: a broadcast enqueues an `Arc` of the snapshot on
//!     every client queue. Filtering and JSON encoding happen later, in the
//!     client's own drain task, against that client's filter.
//!
//! 2.  **Bounded queues, defined eviction**: each client owns a bounded
//!     `mpsc` queue. `broadcast` only ever calls `try_send`; a full queue
//!     evicts the client (its cancellation token fires and the drain task
//!     closes the sink), a closed queue prunes it. The publisher never waits.
//!
//! 3.  **Generation order**: the hub drops events whose generation is not
//!     newer than the last one it broadcast, and each client remembers the
//!     last generation enqueued for it, so no client sees N after N+1.
//!
//! 4.  **Graceful drain**: `shutdown` closes every queue, lets drain tasks
//!     flush what is already queued for a bounded grace period, then cancels
//!     whatever is still running.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::{Repository, RepositoryFilter, Snapshot};

/// Identifier of a connected client, unique within one hub.
pub type ClientId = String;

/// Tunables for the hub.
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// Pending messages a client may accumulate before it is evicted.
    pub client_queue_bound: usize,
    /// Upper bound on a single write to a client sink.
    pub write_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            client_queue_bound: 100,
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// Failure writing to a client sink. Always ends that client's drain task.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientSendError {
    #[error("client connection closed")]
    Closed,
    #[error("write timed out after {0:?}")]
    Timeout(Duration),
    #[error("client I/O error: {0}")]
    Io(String),
}

/// The write half of a client connection.
///
/// The server implements this for the sending half of a WebSocket; tests
/// implement it over channels.
#[async_trait]
pub trait ClientSink: Send + 'static {
    async fn send(&mut self, text: String) -> Result<(), ClientSendError>;

    /// Closes the connection. Called exactly once when the drain task ends.
    async fn close(&mut self);
}

/// Wire message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// The first message a client receives.
    Snapshot,
    /// Sent on every accepted publish after registration.
    Update,
}

/// One queued delivery. Cheap to clone: the snapshot is shared.
#[derive(Debug, Clone)]
pub struct HubEvent {
    pub kind: MessageKind,
    pub snapshot: Arc<Snapshot>,
}

impl HubEvent {
    pub fn update(snapshot: Arc<Snapshot>) -> Self {
        Self {
            kind: MessageKind::Update,
            snapshot,
        }
    }

    pub fn snapshot(snapshot: Arc<Snapshot>) -> Self {
        Self {
            kind: MessageKind::Snapshot,
            snapshot,
        }
    }

    pub fn generation(&self) -> u64 {
        self.snapshot.generation()
    }
}

/// JSON form of a [`HubEvent`] as seen by one client.
#[derive(Debug, Serialize)]
pub struct WireMessage<'a> {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub generation: u64,
    pub timestamp: DateTime<Utc>,
    pub repositories: Vec<&'a Repository>,
}

impl<'a> WireMessage<'a> {
    /// The full snapshot narrowed to `filter`, in rank order.
    pub fn render(event: &'a HubEvent, filter: &'a RepositoryFilter) -> Self {
        Self {
            kind: event.kind,
            generation: event.snapshot.generation(),
            timestamp: event.snapshot.created_at(),
            repositories: event.snapshot.matching(filter).map(|r| &**r).collect(),
        }
    }

    pub fn to_json(event: &HubEvent, filter: &RepositoryFilter) -> Result<String, serde_json::Error> {
        serde_json::to_string(&WireMessage::render(event, filter))
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub generation: u64,
    /// The event was older than the last broadcast and was dropped whole.
    pub stale: bool,
    pub delivered: usize,
    /// Clients whose filter matched nothing in this generation.
    pub skipped: usize,
    /// Clients removed because their queue was full.
    pub evicted: Vec<ClientId>,
    /// Clients removed because their drain task had already ended.
    pub pruned: Vec<ClientId>,
}

struct ClientHandle {
    sender: mpsc::Sender<HubEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    filter: RepositoryFilter,
    last_generation: u64,
}

#[derive(Default)]
struct Registry {
    clients: HashMap<ClientId, ClientHandle>,
    /// The last snapshot broadcast, used to seed late registrations.
    latest: Option<Arc<Snapshot>>,
    last_generation: u64,
    closed: bool,
}

/// # Hub
///
/// Registry of live clients. The registry lock is only held for map edits
/// and non-blocking `try_send` calls, never across an `.await`.
pub struct Hub {
    registry: Mutex<Registry>,
    config: HubConfig,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn client_count(&self) -> usize {
        self.registry().clients.len()
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.registry().clients.contains_key(id)
    }

    /// # Register
    ///
    /// Adds a client and spawns its drain task. Must be called from within a
    /// Tokio runtime.
    ///
    /// When `initial` is given, the newer of it and the last broadcast
    /// snapshot is queued as the client's first message (`type: "snapshot"`)
    /// while the registry lock is held, so no broadcast can slip in between.
    ///
    /// Returns `false` (and drops `sink`) if `id` is already registered or the
    /// hub is shutting down.
    pub fn register<S>(
        &self,
        id: impl Into<ClientId>,
        filter: RepositoryFilter,
        sink: S,
        initial: Option<Arc<Snapshot>>,
    ) -> bool
    where
        S: ClientSink,
    {
        let id = id.into();
        let filter = filter.normalized();
        let mut registry = self.registry();

        if registry.closed || registry.clients.contains_key(&id) {
            debug!(component = "hub", client = %id, "registration refused");
            return false;
        }

        let (sender, receiver) = mpsc::channel(self.config.client_queue_bound.max(1));
        let cancel = CancellationToken::new();

        let seed = match (initial, registry.latest.clone()) {
            (Some(given), Some(latest)) if latest.generation() > given.generation() => Some(latest),
            (Some(given), _) => Some(given),
            (None, _) => None,
        };
        let mut last_generation = 0;
        if let Some(snapshot) = seed {
            last_generation = snapshot.generation();
            // The queue is fresh and its bound is at least one.
            let _ = sender.try_send(HubEvent::snapshot(snapshot));
        }

        let task = tokio::spawn(drain(
            id.clone(),
            receiver,
            sink,
            filter.clone(),
            cancel.clone(),
            self.config.write_timeout,
        ));

        registry.clients.insert(
            id.clone(),
            ClientHandle {
                sender,
                cancel,
                task,
                filter,
                last_generation,
            },
        );
        info!(component = "hub", client = %id, clients = registry.clients.len(), "client registered");
        true
    }

    /// Removes a client and closes its connection. Returns `false` if the
    /// client was not registered.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.registry().clients.remove(id);
        match removed {
            Some(handle) => {
                handle.cancel.cancel();
                info!(component = "hub", client = %id, "client unregistered");
                true
            }
            None => false,
        }
    }

    /// # Broadcast
    ///
    /// Queues `snapshot` as an update for every client whose filter matches
    /// at least one of its repositories. Never blocks.
    ///
    /// ## Logic:
    /// 1.  Drops the event if its generation is not newer than the last one
    ///     broadcast.
    /// 2.  Skips clients whose filter matches nothing in the snapshot (an
    ///     empty filter always matches).
    /// 3.  `try_send`s an `Arc` of the event: a full queue evicts the client,
    ///     a closed queue prunes it.
    pub fn broadcast(&self, snapshot: Arc<Snapshot>) -> BroadcastReport {
        let generation = snapshot.generation();
        let mut report = BroadcastReport {
            generation,
            ..Default::default()
        };
        let event = HubEvent::update(snapshot);

        let mut registry = self.registry();
        if registry.closed || generation <= registry.last_generation {
            report.stale = true;
            drop(registry);
            debug!(component = "hub", generation, "dropped stale broadcast");
            return report;
        }
        registry.last_generation = generation;
        registry.latest = Some(Arc::clone(&event.snapshot));

        registry.clients.retain(|id, client| {
            if client.last_generation >= generation {
                return true;
            }
            if !client.filter.is_empty() && event.snapshot.matching(&client.filter).next().is_none() {
                report.skipped += 1;
                return true;
            }
            match client.sender.try_send(event.clone()) {
                Ok(()) => {
                    client.last_generation = generation;
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    client.cancel.cancel();
                    report.evicted.push(id.clone());
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    report.pruned.push(id.clone());
                    false
                }
            }
        });
        let remaining = registry.clients.len();
        drop(registry);

        for id in &report.evicted {
            warn!(component = "hub", client = %id, generation, "client queue full, evicted");
        }
        for id in &report.pruned {
            debug!(component = "hub", client = %id, "pruned disconnected client");
        }
        info!(
            component = "hub",
            generation,
            delivered = report.delivered,
            skipped = report.skipped,
            clients = remaining,
            "broadcast dispatched"
        );
        report
    }

    /// # Shutdown
    ///
    /// Removes all clients and refuses new registrations. Queued messages are
    /// flushed for up to `grace`; drain tasks still running after that are
    /// cancelled. Returns the number of clients that had to be cancelled.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let clients: Vec<ClientHandle> = {
            let mut registry = self.registry();
            registry.closed = true;
            registry.clients.drain().map(|(_, handle)| handle).collect()
        };
        if clients.is_empty() {
            return 0;
        }
        info!(component = "hub", clients = clients.len(), "draining clients");

        let mut tokens = Vec::with_capacity(clients.len());
        let mut tasks = Vec::with_capacity(clients.len());
        for handle in clients {
            // Dropping the sender lets the drain task finish once its queue is empty.
            drop(handle.sender);
            tokens.push(handle.cancel);
            tasks.push(handle.task);
        }

        let watchers: Vec<AbortHandle> = tasks.iter().map(JoinHandle::abort_handle).collect();
        // One join future for both waits; each handle is polled to completion only once.
        let mut joined = std::pin::pin!(join_all(tasks));
        if tokio::time::timeout(grace, &mut joined).await.is_ok() {
            return 0;
        }

        let stragglers = watchers.iter().filter(|task| !task.is_finished()).count();
        warn!(component = "hub", stragglers, "grace period expired, cancelling clients");
        for token in &tokens {
            token.cancel();
        }
        let _ = tokio::time::timeout(self.config.write_timeout, joined).await;
        stragglers
    }
}

/// Per-client worker: pops events, renders them against the client's filter
/// and writes them with a timeout. Any write failure or cancellation ends the
/// task, including a cancellation that arrives mid-write.
async fn drain<S: ClientSink>(
    id: ClientId,
    mut receiver: mpsc::Receiver<HubEvent>,
    mut sink: S,
    filter: RepositoryFilter,
    cancel: CancellationToken,
    write_timeout: Duration,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = receiver.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let text = match WireMessage::to_json(&event, &filter) {
            Ok(text) => text,
            Err(e) => {
                warn!(component = "hub", client = %id, error = %e, "failed to encode message");
                continue;
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            written = tokio::time::timeout(write_timeout, sink.send(text)) => {
                written.unwrap_or(Err(ClientSendError::Timeout(write_timeout)))
            }
        };
        if let Err(e) = outcome {
            debug!(component = "hub", client = %id, error = %e, "client write failed");
            break;
        }
    }

    let _ = tokio::time::timeout(write_timeout, sink.close()).await;
    debug!(component = "hub", client = %id, "drain task finished");
}
