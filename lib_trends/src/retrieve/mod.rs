//! # Data Retrieval Module
//!
//! Generic HTTP plumbing shared by every component that talks to an external
//! service: the GitHub trend source and the HTTP mail transport.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: A `reqwest`-based `ApiClient` handling base URL joining,
//!   bearer authentication, default headers, request timeouts and JSON
//!   response decoding. Retrying is left to callers: the
//!   scheduler and notifier each own their retry policy.

#![forbid(unsafe_code)]

/// Generic HTTP API client used by ingestors and mailers.
pub mod ky_http;

pub use ky_http::{ApiClient, ApiResponse, RetrieveError};
