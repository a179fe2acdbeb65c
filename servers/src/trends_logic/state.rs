use lib_trends::core::{Hub, Notifier, Store};
use lib_trends::subscribers::SubscriberStore;
use std::path::PathBuf;
use std::sync::Arc;

/// Handles shared by every route. The components are built once in `main`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub hub: Arc<Hub>,
    pub subscribers: Arc<SubscriberStore>,
    /// Told to forget delivered ids when a subscriber leaves.
    pub notifier: Option<Arc<Notifier>>,
    pub static_dir: PathBuf,
}

impl AppState {
    pub fn new(store: Arc<Store>, hub: Arc<Hub>, subscribers: Arc<SubscriberStore>, static_dir: PathBuf) -> Self {
        Self {
            store,
            hub,
            subscribers,
            notifier: None,
            static_dir,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }
}
