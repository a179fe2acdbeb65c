use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::models::Digest;
use crate::retrieve::RetrieveError;

/// Delivery failure for one digest. The notifier retries these a bounded
/// number of times; none of them aborts a run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("mail API rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("mail transport network error: {0}")]
    Network(String),

    #[error("mail delivery timed out after {0:?}")]
    Timeout(Duration),
}

impl From<RetrieveError> for TransportError {
    fn from(err: RetrieveError) -> Self {
        TransportError::Network(err.to_string())
    }
}

/// Something that can deliver a [`Digest`].
#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Human readable name for logs.
    fn name(&self) -> &str;

    /// Whether a successful `send` means the digest left the process. The
    /// notifier only records repositories as delivered when it does.
    fn delivers(&self) -> bool {
        true
    }

    async fn send(&self, digest: &Digest) -> Result<(), TransportError>;
}

/// Writes digests to the log instead of sending them. Used when no mail API
/// credentials are configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl EmailTransport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    fn delivers(&self) -> bool {
        false
    }

    async fn send(&self, digest: &Digest) -> Result<(), TransportError> {
        info!(
            component = "mailer",
            transport = "log",
            recipient = %digest.recipient,
            generation = digest.generation,
            repositories = digest.repositories.len(),
            subject = %digest.subject(),
            "digest not sent, no mail API configured"
        );
        Ok(())
    }
}
