//! # HTTP Mail API Transport
//!
//! Posts each digest as one JSON message to a transactional mail API
//! (`POST {api_url}/send` with a bearer key). Any non-2xx status is a
//! [`TransportError::Rejected`]; the notifier decides whether to retry.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use tracing::debug;

use super::transport::{EmailTransport, TransportError};
use crate::models::Digest;
use crate::retrieve::{ApiClient, RetrieveError};

/// Connection settings for the mail API.
#[derive(Debug, Clone)]
pub struct HttpMailConfig {
    pub api_url: String,
    pub api_key: String,
    /// Sender address.
    pub from: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct OutgoingMail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: String,
    text: String,
}

pub struct HttpMailTransport {
    client: ApiClient,
    from: String,
    timeout: Duration,
}

impl HttpMailTransport {
    pub fn new(config: HttpMailConfig) -> Result<Self, RetrieveError> {
        let client = ApiClient::new(&config.api_url, Some(config.api_key), config.request_timeout)?;
        Ok(Self {
            client,
            from: config.from,
            timeout: config.request_timeout,
        })
    }
}

#[async_trait]
impl EmailTransport for HttpMailTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, digest: &Digest) -> Result<(), TransportError> {
        let mail = OutgoingMail {
            from: &self.from,
            to: [&digest.recipient],
            subject: digest.subject(),
            text: digest.text_body(),
        };

        let response = self
            .client
            .request::<serde_json::Value, _>(Method::POST, "send", &[], None, Some(&mail))
            .await
            .map_err(|e| match e {
                RetrieveError::Timeout => TransportError::Timeout(self.timeout),
                other => TransportError::from(other),
            })?;

        if !response.success {
            return Err(TransportError::Rejected {
                status: response.status,
                body: response.error_body.unwrap_or_default(),
            });
        }

        debug!(
            component = "mailer",
            transport = "http",
            recipient = %digest.recipient,
            status = response.status,
            "digest accepted by mail API"
        );
        Ok(())
    }
}
