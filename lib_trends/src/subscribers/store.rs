use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use super::SubscriberSource;
use crate::models::{RepositoryFilter, Subscriber};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("invalid email address: {0:?}")]
    InvalidEmail(String),
}

/// Subscribers keyed by normalised email address.
///
/// Subscribing an address that already exists replaces its filter and keeps
/// its token and creation time.
#[derive(Debug, Default)]
pub struct SubscriberStore {
    by_email: RwLock<HashMap<String, Subscriber>>,
}

impl SubscriberStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, email: &str, filter: RepositoryFilter) -> Result<Subscriber, SubscribeError> {
        let email = normalize_email(email)?;
        let filter = filter.normalized();

        let mut by_email = self.by_email.write().unwrap_or_else(PoisonError::into_inner);
        let subscriber = by_email
            .entry(email.clone())
            .and_modify(|existing| existing.filter = filter.clone())
            .or_insert_with(|| Subscriber {
                email: email.clone(),
                filter,
                token: Uuid::new_v4().simple().to_string(),
                created_at: Utc::now(),
            })
            .clone();
        let total = by_email.len();
        drop(by_email);

        info!(component = "subscribers", email = %subscriber.email, total, "subscriber saved");
        Ok(subscriber)
    }

    /// Removes the subscriber owning `token`.
    pub fn unsubscribe(&self, token: &str) -> Option<Subscriber> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        let mut by_email = self.by_email.write().unwrap_or_else(PoisonError::into_inner);
        let email = by_email
            .values()
            .find(|s| s.token == token)
            .map(|s| s.email.clone())?;
        let removed = by_email.remove(&email);
        drop(by_email);

        info!(component = "subscribers", email = %email, "subscriber removed");
        removed
    }

    pub fn get(&self, email: &str) -> Option<Subscriber> {
        let email = normalize_email(email).ok()?;
        self.by_email
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&email)
            .cloned()
    }

    /// All subscribers, oldest first.
    pub fn list(&self) -> Vec<Subscriber> {
        let mut all: Vec<Subscriber> = self
            .by_email
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.email.cmp(&b.email)));
        all
    }

    pub fn len(&self) -> usize {
        self.by_email.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SubscriberSource for SubscriberStore {
    async fn subscribers(&self) -> Vec<Subscriber> {
        self.list()
    }
}

/// Trims and lower-cases `raw`, rejecting anything that is not plausibly an
/// address: exactly one `@`, a non-empty local part and a dotted domain.
fn normalize_email(raw: &str) -> Result<String, SubscribeError> {
    let email = raw.trim().to_lowercase();
    let invalid = || SubscribeError::InvalidEmail(raw.to_string());

    if email.is_empty() || email.len() > 254 || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    let domain_ok = !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..");
    if local.is_empty() || !domain_ok {
        return Err(invalid());
    }
    Ok(email)
}
