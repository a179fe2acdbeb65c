//! # Core Pipeline Components
//!
//! The producer/consumer/broadcast pipeline of the aggregator.
//!
//! ## Contained Modules:
//!
//! - **`store`**: the authoritative current [`Snapshot`](crate::models::Snapshot),
//!   replaced atomically and read wait-free.
//! - **`hub`**: the registry of live clients, each with a bounded queue and
//!   its own drain task.
//! - **`scheduler`**: the refresh loop that fetches, publishes and
//!   broadcasts.
//! - **`backoff`**: exponential backoff with jitter for failed fetches.
//! - **`notifier`**: periodic per-subscriber digests through an email
//!   transport.

#![forbid(unsafe_code)]

/// Retry delays for the scheduler.
pub mod backoff;
/// Client registry and broadcast fan-out.
pub mod hub;
/// Digest composition and delivery.
pub mod notifier;
/// The refresh loop.
pub mod scheduler;
/// Atomic snapshot storage.
pub mod store;

pub use backoff::{Backoff, BackoffPolicy};
pub use hub::{BroadcastReport, ClientId, ClientSendError, ClientSink, Hub, HubConfig, HubEvent, MessageKind, WireMessage};
pub use notifier::{DigestReport, Notifier, NotifierConfig};
pub use scheduler::{CycleOutcome, CycleReport, Scheduler, SchedulerConfig, SchedulerState};
pub use store::{StaleSwapError, Store, SwapReceipt};
