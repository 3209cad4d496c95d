//! Notification types and the listener contract
//!
//! The engine reports every change through a [`NotificationListener`].
//! Callbacks run synchronously on the watcher's worker; a listener that
//! needs to do slow work should hand it off, for example through the
//! [`ChannelListener`] adapter.

use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::trace;
use treewatch_core::error::Error;

/// Kind of change reported for a single entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Entry appeared
    Created,
    /// Regular file's modification time changed
    Updated,
    /// Entry disappeared
    Deleted,
}

/// Receives the notifications emitted by a tree watcher
///
/// All paths handed to the `path_*` callbacks are relative to `root`.
pub trait NotificationListener: Send + Sync + 'static {
    /// The watcher finished its initial walk and is observing `root`
    fn started(&self, _root: &Path) {}

    /// An entry appeared
    fn path_created(&self, root: &Path, relative_path: &Path, is_directory: bool);

    /// A regular file was modified
    fn path_updated(&self, root: &Path, relative_path: &Path, is_directory: bool);

    /// An entry disappeared
    fn path_deleted(&self, root: &Path, relative_path: &Path, is_directory: bool);

    /// The watcher failed and stopped; no further callbacks follow
    fn error_occurred(&self, root: &Path, cause: &Error);
}

/// A notification as a value, for consumers that prefer a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchNotification {
    /// Watching has started
    Started { root: PathBuf },
    /// A single entry changed
    Changed(PathChange),
    /// The watcher failed; the message is the rendered cause
    Failed { root: PathBuf, message: String },
}

/// One created/updated/deleted entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathChange {
    /// What happened
    pub kind: ChangeKind,
    /// Path relative to the watch root
    pub relative_path: PathBuf,
    /// Whether the entry is a directory
    pub is_directory: bool,
}

impl PathChange {
    /// Create a new change record
    pub fn new(kind: ChangeKind, relative_path: impl Into<PathBuf>, is_directory: bool) -> Self {
        Self {
            kind,
            relative_path: relative_path.into(),
            is_directory,
        }
    }
}

/// Listener that forwards every callback into an unbounded channel
///
/// Sending never blocks the worker. Notifications are dropped silently
/// once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<WatchNotification>,
}

impl ChannelListener {
    /// Create a listener and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WatchNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, notification: WatchNotification) {
        if self.tx.send(notification).is_err() {
            trace!("Notification receiver dropped");
        }
    }

    fn change(&self, kind: ChangeKind, relative_path: &Path, is_directory: bool) {
        self.forward(WatchNotification::Changed(PathChange::new(
            kind,
            relative_path,
            is_directory,
        )));
    }
}

impl NotificationListener for ChannelListener {
    fn started(&self, root: &Path) {
        self.forward(WatchNotification::Started {
            root: root.to_path_buf(),
        });
    }

    fn path_created(&self, _root: &Path, relative_path: &Path, is_directory: bool) {
        self.change(ChangeKind::Created, relative_path, is_directory);
    }

    fn path_updated(&self, _root: &Path, relative_path: &Path, is_directory: bool) {
        self.change(ChangeKind::Updated, relative_path, is_directory);
    }

    fn path_deleted(&self, _root: &Path, relative_path: &Path, is_directory: bool) {
        self.change(ChangeKind::Deleted, relative_path, is_directory);
    }

    fn error_occurred(&self, root: &Path, cause: &Error) {
        self.forward(WatchNotification::Failed {
            root: root.to_path_buf(),
            message: cause.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_listener_forwards_in_order() {
        let (listener, mut rx) = ChannelListener::new();
        let root = Path::new("/watched");

        listener.started(root);
        listener.path_created(root, Path::new("src"), true);
        listener.path_updated(root, Path::new("src/lib.rs"), false);
        listener.path_deleted(root, Path::new("old.txt"), false);
        listener.error_occurred(root, &Error::watch_service("queue closed"));

        assert_eq!(
            rx.try_recv().expect("started"),
            WatchNotification::Started {
                root: root.to_path_buf()
            }
        );
        assert_eq!(
            rx.try_recv().expect("created"),
            WatchNotification::Changed(PathChange::new(ChangeKind::Created, "src", true))
        );
        assert_eq!(
            rx.try_recv().expect("updated"),
            WatchNotification::Changed(PathChange::new(ChangeKind::Updated, "src/lib.rs", false))
        );
        assert_eq!(
            rx.try_recv().expect("deleted"),
            WatchNotification::Changed(PathChange::new(ChangeKind::Deleted, "old.txt", false))
        );
        assert!(matches!(
            rx.try_recv().expect("failed"),
            WatchNotification::Failed { message, .. } if message.contains("queue closed")
        ));
    }

    #[test]
    fn test_channel_listener_survives_dropped_receiver() {
        let (listener, rx) = ChannelListener::new();
        drop(rx);

        listener.path_created(Path::new("/watched"), Path::new("a"), false);
    }
}
