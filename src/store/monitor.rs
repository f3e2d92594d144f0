//! Lifecycle notifications of a token scan store.

use tracing::{info, warn};

/// Observer of store lifecycle events
pub trait ScanStoreMonitor: Send + Sync {
    /// `init` started
    fn init(&self) {}

    /// No store file existed; an empty one is created and rebuilt
    fn no_index(&self) {}

    /// The store file was unusable and is replaced by a rebuild
    fn not_valid_index(&self) {}

    /// Rebuild from the full store change stream is starting
    fn rebuilding(&self) {}

    /// Rebuild finished after applying `updates` entity updates
    fn rebuilt(&self, _updates: u64) {}
}

/// Reports lifecycle events through `tracing`
#[derive(Debug, Clone, Copy)]
pub struct LoggingMonitor {
    store_name: &'static str,
}

impl LoggingMonitor {
    pub fn new(store_name: &'static str) -> Self {
        Self { store_name }
    }
}

impl ScanStoreMonitor for LoggingMonitor {
    fn no_index(&self) {
        info!(store = self.store_name, "no scan store found, this will trigger a rebuild");
    }

    fn not_valid_index(&self) {
        warn!(store = self.store_name, "scan store is not valid, this will trigger a rebuild");
    }

    fn rebuilding(&self) {
        info!(store = self.store_name, "rebuilding scan store, this may take a while");
    }

    fn rebuilt(&self, updates: u64) {
        info!(store = self.store_name, updates, "scan store rebuilt");
    }
}
