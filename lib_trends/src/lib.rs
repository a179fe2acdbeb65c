//! # lib_trends
//!
//! Shared library for the trends aggregator. It holds the producer/consumer/
//! broadcast pipeline (`core`), the data model (`models`), and the thin
//! collaborators the pipeline talks to: the GitHub trend source
//! (`ingestors`), the HTTP client (`retrieve`), email transports (`mailers`),
//! the subscriber store (`subscribers`) and startup secret loading
//! (`configs`).
//!
//! Every long-lived component is constructed explicitly and shared through
//! `Arc`; nothing here is a process-wide static.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod models;

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "core")]
pub mod core;
#[cfg(feature = "ingestors")]
pub mod ingestors;
#[cfg(feature = "mailers")]
pub mod mailers;
#[cfg(feature = "retrieve")]
pub mod retrieve;
#[cfg(feature = "subscribers")]
pub mod subscribers;

pub use models::{Page, Repository, RepositoryFilter, Snapshot, Subscriber};
