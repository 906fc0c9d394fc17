//! File monitor - discovery, cataloging, dispatch
//!
//! The monitor walks a watched directory tree on a cadence, fingerprints what
//! it finds, and hands new or changed files to the pipeline exactly once per
//! content version. Polling is used instead of inotify-style notification
//! because notification does not work on network filesystems (SMB, NFS,
//! FUSE mounts).

pub mod catalog;
pub mod dispatcher;
pub mod error;
pub mod runner;
pub mod scanner;
pub mod types;

pub use catalog::Catalog;
pub use dispatcher::Dispatcher;
pub use error::{MonitorError, Result};
pub use runner::{FileMonitor, MonitorHandle, MonitorState};
pub use scanner::{ScanSettings, Scanner};
pub use types::{
    CatalogStats, CycleReport, DispatchReport, FileRecord, FileState, Fingerprint, ScanStats,
    UpsertOutcome,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Token for cooperative cancellation of the monitor loop.
///
/// Uses an AtomicBool internally. Clone is cheap and shares state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new cancellation token (not cancelled).
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token_shares_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
