//! The event collector worker
//!
//! A single task owns the registry and the pending set. It turns native
//! notifications into pending directories, flushes them through the differ
//! once activity settles, and answers queries from the [`FileTreeWatcher`]
//! handle.
//!
//! [`FileTreeWatcher`]: crate::FileTreeWatcher

use crate::backend::{EventSource, NativeEvent};
use crate::config::{WatchBackend, WatcherConfig};
use crate::differ::SnapshotDiffer;
use crate::events::NotificationListener;
use crate::registry::WatchRegistry;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};
use treewatch_core::error::{Error, Result};

/// Counters describing a running watcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchStats {
    /// Backend delivering notifications
    pub backend: WatchBackend,
    /// Directories with an active watch
    pub watched_directories: usize,
    /// Entries tracked across all snapshots
    pub tracked_entries: usize,
    /// Directories waiting for the next flush
    pub pending_directories: usize,
    /// Native notifications received
    pub notifications: u64,
    /// Times notifications were lost and everything was rescanned
    pub overflows: u64,
    /// Coalesced batches processed
    pub flushes: u64,
    /// Individual directory diffs performed
    pub directories_diffed: u64,
    /// Created notifications emitted
    pub created: u64,
    /// Updated notifications emitted
    pub updated: u64,
    /// Deleted notifications emitted
    pub deleted: u64,
}

/// One tracked entry, as currently known to the watcher
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SnapshotEntry {
    pub relative_path: PathBuf,
    pub is_directory: bool,
    pub modified: Option<SystemTime>,
}

/// Requests served by the worker
#[derive(Debug)]
pub(crate) enum Command {
    Stats(oneshot::Sender<WatchStats>),
    Snapshot(oneshot::Sender<Vec<SnapshotEntry>>),
    Rescan(oneshot::Sender<()>),
}

/// Deduplicated directories awaiting a diff, in first-marked order
#[derive(Debug, Default)]
pub(crate) struct PendingSet {
    order: Vec<PathBuf>,
    members: HashSet<PathBuf>,
    first_marked: Option<Instant>,
    last_marked: Option<Instant>,
}

impl PendingSet {
    /// Mark a directory; returns `false` if it was already pending
    pub(crate) fn insert(&mut self, dir: PathBuf) -> bool {
        let now = Instant::now();
        self.first_marked.get_or_insert(now);
        self.last_marked = Some(now);

        if self.members.contains(&dir) {
            return false;
        }
        self.members.insert(dir.clone());
        self.order.push(dir);
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Drain the set, oldest first
    pub(crate) fn take(&mut self) -> Vec<PathBuf> {
        self.members.clear();
        self.first_marked = None;
        self.last_marked = None;
        std::mem::take(&mut self.order)
    }

    /// When the set must be flushed: after `idle` without new marks, or
    /// `max_delay` after the first mark, whichever comes first
    pub(crate) fn deadline(&self, idle: Duration, max_delay: Duration) -> Option<Instant> {
        let first = self.first_marked?;
        let last = self.last_marked?;
        Some((last + idle).min(first + max_delay))
    }
}

/// The single worker behind a [`crate::FileTreeWatcher`]
pub(crate) struct EventCollector {
    differ: SnapshotDiffer,
    pending: PendingSet,
    source: EventSource,
    commands: mpsc::Receiver<Command>,
    cancellation_token: CancellationToken,
    listener: Arc<dyn NotificationListener>,
    backend: WatchBackend,
    coalesce_timeout: Duration,
    max_coalesce_delay: Duration,
    notifications: u64,
    overflows: u64,
    flushes: u64,
}

impl EventCollector {
    pub(crate) fn new(
        registry: WatchRegistry,
        listener: Arc<dyn NotificationListener>,
        source: EventSource,
        commands: mpsc::Receiver<Command>,
        cancellation_token: CancellationToken,
        backend: WatchBackend,
        config: &WatcherConfig,
    ) -> Self {
        Self {
            differ: SnapshotDiffer::new(registry, Arc::clone(&listener)),
            pending: PendingSet::default(),
            source,
            commands,
            cancellation_token,
            listener,
            backend,
            coalesce_timeout: config.coalesce_timeout(),
            max_coalesce_delay: config.max_coalesce_delay(),
            notifications: 0,
            overflows: 0,
            flushes: 0,
        }
    }

    /// Run until cancelled or until the watch service fails
    ///
    /// Hands the registry back so the caller can cancel what is left.
    pub(crate) async fn run(mut self) -> WatchRegistry {
        debug!(
            "Event collector started ({} directories)",
            self.differ.registry().len()
        );

        loop {
            let deadline = self
                .pending
                .deadline(self.coalesce_timeout, self.max_coalesce_delay);

            let step = tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => {
                    debug!("Event collector cancelled");
                    break;
                }
                Some(command) = self.commands.recv() => self.handle_command(command),
                // ahead of events, so a steady stream cannot postpone a flush
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush()
                }
                event = self.source.recv() => self.handle_event(event),
            };

            if let Err(e) = step {
                error!("Watcher stopped: {}", e);
                self.listener
                    .error_occurred(self.differ.registry().root(), &e);
                break;
            }
        }

        self.differ.into_registry()
    }

    fn handle_event(&mut self, event: Option<NativeEvent>) -> Result<()> {
        match event {
            Some(NativeEvent::Changed(paths)) => {
                self.notifications += 1;
                for path in &paths {
                    self.mark_changed(path);
                }
                Ok(())
            }
            Some(NativeEvent::Removed(paths)) => {
                self.notifications += 1;
                for path in &paths {
                    self.differ.mark_stale(path);
                    self.mark_changed(path);
                }
                Ok(())
            }
            Some(NativeEvent::Overflow) => {
                self.overflows += 1;
                warn!("Notifications were lost, rescanning every directory");
                self.mark_all();
                Ok(())
            }
            Some(NativeEvent::Failed(message)) => Err(Error::watch_service(message)),
            None => Err(Error::watch_service("Native event queue closed")),
        }
    }

    /// Mark the directories affected by activity at `path`
    ///
    /// That is the parent, which lists `path`, and `path` itself when it is
    /// a watched directory.
    fn mark_changed(&mut self, path: &Path) {
        let registry = self.differ.registry();

        if let Some(parent) = path.parent() {
            if registry.contains(parent) {
                self.pending.insert(parent.to_path_buf());
            }
        }
        if registry.contains(path) {
            self.pending.insert(path.to_path_buf());
        } else if !path.starts_with(registry.root()) {
            trace!("Ignoring notification outside the root: {:?}", path);
        }
    }

    fn mark_all(&mut self) {
        for dir in self.differ.registry().paths() {
            self.pending.insert(dir);
        }
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let batch = self.pending.take();
        self.flushes += 1;
        debug!("Flushing {} pending directories", batch.len());
        for dir in &batch {
            self.differ.diff_directory(dir)?;
        }
        Ok(())
    }

    fn handle_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
                Ok(())
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
                Ok(())
            }
            Command::Rescan(reply) => {
                debug!("Rescan requested");
                self.mark_all();
                let result = self.flush();
                let _ = reply.send(());
                result
            }
        }
    }

    fn stats(&self) -> WatchStats {
        let registry = self.differ.registry();
        let counters = self.differ.counters();

        WatchStats {
            backend: self.backend,
            watched_directories: registry.len(),
            tracked_entries: registry.tracked_entries(),
            pending_directories: self.pending.len(),
            notifications: self.notifications,
            overflows: self.overflows,
            flushes: self.flushes,
            directories_diffed: counters.directories_diffed,
            created: counters.created,
            updated: counters.updated,
            deleted: counters.deleted,
        }
    }

    fn snapshot(&self) -> Vec<SnapshotEntry> {
        let registry = self.differ.registry();
        let mut entries = Vec::with_capacity(registry.tracked_entries());

        for (dir, watched) in registry.directories() {
            for (name, item) in &watched.items {
                let path = dir.join(name);
                if let Some(relative) = registry.relative(&path) {
                    entries.push(SnapshotEntry {
                        relative_path: relative.to_path_buf(),
                        is_directory: item.is_directory,
                        modified: item.modified,
                    });
                }
            }
        }

        entries.sort();
        entries
    }
}
