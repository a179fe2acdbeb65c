use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::filter::RepositoryFilter;

/// # Subscriber
///
/// A digest recipient. Created and updated through the subscribe routes and
/// only read by the notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    /// Normalised (trimmed, lower-cased) address.
    pub email: String,
    pub filter: RepositoryFilter,
    /// Opaque token carried in digests for unsubscribe links.
    pub token: String,
    pub created_at: DateTime<Utc>,
}
