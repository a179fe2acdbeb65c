//! # Mail Transports
//!
//! The notifier composes digests; the types in here deliver them.
//!
//! ## Contained Modules:
//! - **`transport`**: the [`EmailTransport`] seam, its error type and a
//!   log-only transport used when no mail API is configured.
//! - **`http_mailer`**: delivery through a JSON mail API over the shared
//!   `ApiClient`.

#![forbid(unsafe_code)]

/// JSON mail API transport.
pub mod http_mailer;
/// Transport trait, errors and the log-only fallback.
pub mod transport;

pub use http_mailer::{HttpMailConfig, HttpMailTransport};
pub use transport::{EmailTransport, LogTransport, TransportError};
