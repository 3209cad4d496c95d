//! Listener that reports changes through the log

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info};
use treewatch_core::error::Error;
use treewatch_watcher::NotificationListener;

/// Logs every notification and counts them for the exit summary
#[derive(Debug, Default)]
pub struct LoggingListener {
    created: AtomicU64,
    updated: AtomicU64,
    deleted: AtomicU64,
}

impl LoggingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Created, updated and deleted counts so far
    pub fn totals(&self) -> (u64, u64, u64) {
        (
            self.created.load(Ordering::Relaxed),
            self.updated.load(Ordering::Relaxed),
            self.deleted.load(Ordering::Relaxed),
        )
    }
}

fn kind_label(is_directory: bool) -> &'static str {
    if is_directory {
        "dir"
    } else {
        "file"
    }
}

impl NotificationListener for LoggingListener {
    fn started(&self, root: &Path) {
        info!("Watching {}", root.display());
    }

    fn path_created(&self, _root: &Path, relative_path: &Path, is_directory: bool) {
        self.created.fetch_add(1, Ordering::Relaxed);
        info!("created {} {}", kind_label(is_directory), relative_path.display());
    }

    fn path_updated(&self, _root: &Path, relative_path: &Path, is_directory: bool) {
        self.updated.fetch_add(1, Ordering::Relaxed);
        info!("updated {} {}", kind_label(is_directory), relative_path.display());
    }

    fn path_deleted(&self, _root: &Path, relative_path: &Path, is_directory: bool) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
        info!("deleted {} {}", kind_label(is_directory), relative_path.display());
    }

    fn error_occurred(&self, root: &Path, cause: &Error) {
        error!("Stopped watching {}: {}", root.display(), cause);
    }
}
