//! The tree watcher handle
//!
//! [`FileTreeWatcher`] validates its inputs, performs the initial walk on
//! the caller, then hands everything to the event collector worker and
//! talks to it over a request channel.

use crate::backend::{event_queue, NotifyBackend};
use crate::collector::{Command, EventCollector, SnapshotEntry, WatchStats};
use crate::config::WatcherConfig;
use crate::events::NotificationListener;
use crate::exclude::ExcludeFilter;
use crate::registry::WatchRegistry;
use crate::walker::TreeWalker;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use treewatch_core::error::{Error, Result};

const COMMAND_QUEUE_SIZE: usize = 32;

enum WatcherState {
    /// Constructed, not yet started
    Idle,
    Running {
        worker: JoinHandle<WatchRegistry>,
        commands: mpsc::Sender<Command>,
    },
    /// Shut down; cannot be restarted
    Stopped,
}

/// Recursive change notifications for one directory tree
pub struct FileTreeWatcher {
    /// Canonical watch root
    root: PathBuf,
    /// Configuration
    config: Arc<WatcherConfig>,
    /// Exclusion filter
    filter: ExcludeFilter,
    /// Notification receiver
    listener: Arc<dyn NotificationListener>,
    state: WatcherState,
    /// Cancellation token for stopping the worker
    cancellation_token: CancellationToken,
}

impl fmt::Debug for FileTreeWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileTreeWatcher")
            .field("root", &self.root)
            .field("config", &self.config)
            .field("filter", &self.filter)
            .field("running", &self.is_running())
            .finish()
    }
}

impl FileTreeWatcher {
    /// Create a watcher for `root`, excluding what the configuration names
    ///
    /// Fails if the root does not exist or is not a directory, if a pattern
    /// is invalid, or if the configuration is unusable.
    pub fn new(
        root: impl AsRef<Path>,
        config: WatcherConfig,
        listener: Arc<dyn NotificationListener>,
    ) -> Result<Self> {
        let filter = ExcludeFilter::builder()
            .patterns(config.exclude_patterns.clone())
            .excluded_dirs(config.excluded_dirs.iter().cloned())
            .build()
            .map_err(|e| Error::config(format!("Invalid exclude pattern: {e}")))?;

        Self::with_filter(root, config, filter, listener)
    }

    /// Create a watcher with a caller-built exclusion filter
    ///
    /// The configuration's own exclusions are ignored.
    pub fn with_filter(
        root: impl AsRef<Path>,
        config: WatcherConfig,
        filter: ExcludeFilter,
        listener: Arc<dyn NotificationListener>,
    ) -> Result<Self> {
        config.validate()?;

        let root = root.as_ref();
        let root = root
            .canonicalize()
            .map_err(|e| Error::config(format!("Watch root {root:?} is not accessible: {e}")))?;
        if !root.is_dir() {
            return Err(Error::config(format!(
                "Watch root {root:?} is not a directory"
            )));
        }

        Ok(Self {
            root,
            config: Arc::new(config),
            filter,
            listener,
            state: WatcherState::Idle,
            cancellation_token: CancellationToken::new(),
        })
    }

    /// The canonical watch root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the worker is alive
    ///
    /// Turns false after a shutdown and after a fatal watch service failure.
    pub fn is_running(&self) -> bool {
        match &self.state {
            WatcherState::Running { worker, .. } => !worker.is_finished(),
            _ => false,
        }
    }

    /// Start watching
    ///
    /// Walks the whole tree and watches every observable directory before
    /// returning; existing entries are not reported. `started` is delivered
    /// to the listener before any change.
    pub async fn start(&mut self) -> Result<()> {
        match self.state {
            WatcherState::Idle => {}
            WatcherState::Running { .. } => {
                return Err(Error::invalid_input("Watcher is already started"));
            }
            WatcherState::Stopped => {
                return Err(Error::invalid_input("Watcher was shut down"));
            }
        }

        let (sink, source) = event_queue(self.config.event_queue_capacity);
        let backend = NotifyBackend::open(&self.config, sink)?;
        let backend_kind = backend.kind();
        let mut registry =
            WatchRegistry::new(self.root.clone(), self.filter.clone(), Box::new(backend));

        self.register_tree(&mut registry)?;
        info!(
            "Watching {:?}: {} directories, {} entries ({:?} backend)",
            self.root,
            registry.len(),
            registry.tracked_entries(),
            backend_kind
        );

        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let collector = EventCollector::new(
            registry,
            Arc::clone(&self.listener),
            source,
            command_rx,
            self.cancellation_token.clone(),
            backend_kind,
            &self.config,
        );

        self.listener.started(&self.root);
        let worker = tokio::spawn(collector.run());
        self.state = WatcherState::Running { worker, commands };
        Ok(())
    }

    /// Register every observable directory, parents first
    fn register_tree(&self, registry: &mut WatchRegistry) -> Result<()> {
        let walker = TreeWalker::new(&self.root, self.filter.clone())
            .directories_only()
            .include_root();

        for entry in walker.walk() {
            match registry.register(&entry.path) {
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    registry.cancel_all();
                    return Err(e);
                }
                Err(e) => debug!("Skipping {:?} during initial walk: {}", entry.path, e),
            }
        }

        if !registry.contains(&self.root) {
            registry.cancel_all();
            return Err(Error::watcher(format!(
                "Failed to watch root {:?}",
                self.root
            )));
        }
        Ok(())
    }

    /// Stop watching
    ///
    /// The worker gets the configured grace period to finish its current
    /// pass before it is aborted. Every remaining watch is cancelled. Safe
    /// to call more than once; problems are logged, not returned.
    pub async fn shutdown(&mut self) {
        let state = std::mem::replace(&mut self.state, WatcherState::Stopped);
        let WatcherState::Running {
            mut worker,
            commands,
        } = state
        else {
            return;
        };

        drop(commands);
        self.cancellation_token.cancel();

        let grace = self.config.shutdown_grace();
        match tokio::time::timeout(grace, &mut worker).await {
            Ok(Ok(mut registry)) => {
                let cancelled = registry.cancel_all();
                debug!("Cancelled {} watches", cancelled);
            }
            Ok(Err(e)) => error!("Watcher worker failed: {}", e),
            Err(_) => {
                warn!("Watcher worker did not stop within {:?}, aborting", grace);
                worker.abort();
            }
        }

        info!("Stopped watching {:?}", self.root);
    }

    /// Current counters
    pub async fn stats(&self) -> Result<WatchStats> {
        self.request(Command::Stats).await
    }

    /// Every tracked entry, sorted by relative path
    pub async fn snapshot(&self) -> Result<Vec<SnapshotEntry>> {
        self.request(Command::Snapshot).await
    }

    /// Diff every watched directory now, without waiting for notifications
    pub async fn rescan(&self) -> Result<()> {
        self.request(Command::Rescan).await
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let WatcherState::Running { commands, .. } = &self.state else {
            return Err(Error::watcher("Watcher is not running"));
        };

        let (tx, rx) = oneshot::channel();
        commands
            .send(command(tx))
            .await
            .map_err(|_| Error::watcher("Watcher worker has stopped"))?;
        rx.await
            .map_err(|_| Error::watcher("Watcher worker has stopped"))
    }
}

impl Drop for FileTreeWatcher {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelListener;
    use std::fs;
    use tempfile::TempDir;

    fn listener() -> Arc<dyn NotificationListener> {
        Arc::new(ChannelListener::new().0)
    }

    #[test]
    fn test_missing_root_is_rejected() {
        let temp_dir = TempDir::new().expect("test setup failed");

        let err = FileTreeWatcher::new(
            temp_dir.path().join("missing"),
            WatcherConfig::default(),
            listener(),
        )
        .expect_err("missing root");

        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_file_root_is_rejected() {
        let temp_dir = TempDir::new().expect("test setup failed");
        let file = temp_dir.path().join("file.txt");
        fs::write(&file, "").expect("test setup failed");

        let err = FileTreeWatcher::new(&file, WatcherConfig::default(), listener())
            .expect_err("file root");

        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let temp_dir = TempDir::new().expect("test setup failed");
        let config = WatcherConfig::builder().add_exclude_pattern("[").build();

        let err = FileTreeWatcher::new(temp_dir.path(), config, listener())
            .expect_err("invalid pattern");

        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_root_is_canonicalized() {
        let temp_dir = TempDir::new().expect("test setup failed");
        fs::create_dir(temp_dir.path().join("sub")).expect("test setup failed");

        let watcher = FileTreeWatcher::new(
            temp_dir.path().join("sub/../sub"),
            WatcherConfig::default(),
            listener(),
        )
        .expect("valid root");

        assert_eq!(
            watcher.root(),
            temp_dir
                .path()
                .join("sub")
                .canonicalize()
                .expect("test setup failed")
        );
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let temp_dir = TempDir::new().expect("test setup failed");
        let mut watcher =
            FileTreeWatcher::new(temp_dir.path(), WatcherConfig::default(), listener())
                .expect("valid root");

        assert!(watcher.stats().await.is_err());

        watcher.start().await.expect("start");
        assert!(watcher.is_running());
        assert!(watcher.start().await.is_err());

        watcher.shutdown().await;
        assert!(!watcher.is_running());
        watcher.shutdown().await;
        assert!(watcher.start().await.is_err());
    }
}
