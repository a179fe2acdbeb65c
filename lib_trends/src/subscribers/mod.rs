//! # Subscribers Module
//!
//! Digest subscribers and the seam through which the notifier reads them.
//!
//! ## Contained Modules:
//! - **`store`**: an in-memory, email-keyed [`SubscriberStore`] written by the
//!   subscribe/unsubscribe routes.

#![forbid(unsafe_code)]

use async_trait::async_trait;

use crate::models::Subscriber;

/// In-memory subscriber registry.
pub mod store;

pub use store::{SubscribeError, SubscriberStore};

/// Read access to the current subscriber list.
#[async_trait]
pub trait SubscriberSource: Send + Sync {
    async fn subscribers(&self) -> Vec<Subscriber>;
}
