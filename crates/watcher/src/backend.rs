//! Native notification backends
//!
//! Each registered directory gets its own non-recursive watch. The raw
//! notifications are reduced to [`NativeEvent`]s, which only say *where*
//! something happened; the engine re-reads the directory to find out what.

use crate::config::{WatchBackend, WatcherConfig};
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{
    Config as NotifyConfig, ErrorKind, Event as NotifyEvent, EventKind, PollWatcher,
    RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use treewatch_core::error::{Error, Result};

/// Something the platform told us about
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NativeEvent {
    /// Activity at these absolute paths
    Changed(Vec<PathBuf>),
    /// These absolute paths were removed or renamed away
    ///
    /// A watched directory named here has lost its native watch, even if a
    /// new directory appears at the same path later.
    Removed(Vec<PathBuf>),
    /// Notifications were lost; every directory must be re-read
    Overflow,
    /// The notification service broke down
    Failed(String),
}

/// Registers and cancels per-directory watches
pub(crate) trait DirectoryWatcher: Send {
    /// Start receiving notifications for the direct children of `dir`
    fn watch_directory(&mut self, dir: &Path) -> Result<()>;

    /// Stop receiving notifications for `dir`
    fn unwatch_directory(&mut self, dir: &Path) -> Result<()>;
}

#[derive(Debug, Default)]
struct SinkState {
    overflowed: AtomicBool,
    failure: OnceLock<String>,
}

/// Producer side of the native event queue, driven by notify's callback
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<NativeEvent>,
    state: Arc<SinkState>,
}

/// Consumer side of the native event queue
#[derive(Debug)]
pub(crate) struct EventSource {
    rx: mpsc::Receiver<NativeEvent>,
    state: Arc<SinkState>,
}

/// Create a bounded native event queue
///
/// When the queue is full, further notifications collapse into a single
/// [`NativeEvent::Overflow`].
pub(crate) fn event_queue(capacity: usize) -> (EventSink, EventSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let state = Arc::new(SinkState::default());
    (
        EventSink {
            tx,
            state: Arc::clone(&state),
        },
        EventSource { rx, state },
    )
}

impl EventSink {
    /// Translate one notify callback into the queue
    pub(crate) fn deliver(&self, res: notify::Result<NotifyEvent>) {
        match res {
            Ok(event) => {
                if event.need_rescan() {
                    warn!("Native notifications overflowed; scheduling full rescan");
                    self.overflow();
                    return;
                }
                if is_noise(&event.kind) || event.paths.is_empty() {
                    trace!("Ignoring notification: {:?}", event.kind);
                    return;
                }
                if is_removal(&event.kind) {
                    self.push(NativeEvent::Removed(event.paths));
                } else {
                    self.push(NativeEvent::Changed(event.paths));
                }
            }
            Err(e) => self.deliver_error(e),
        }
    }

    fn deliver_error(&self, err: notify::Error) {
        match err.kind {
            ErrorKind::MaxFilesWatch => {
                self.fail(format!("Watch limit reached: {err}"));
            }
            _ if !err.paths.is_empty() => {
                debug!("Notify error for {:?}, rescheduling: {}", err.paths, err);
                self.push(NativeEvent::Changed(err.paths));
            }
            ErrorKind::PathNotFound | ErrorKind::WatchNotFound => {
                debug!("Ignoring notify error without path: {}", err);
            }
            _ => self.fail(format!("Notify error: {err}")),
        }
    }

    fn push(&self, event: NativeEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => self.overflow(),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("Native event queue closed");
            }
        }
    }

    fn overflow(&self) {
        if !self.state.overflowed.swap(true, Ordering::AcqRel) {
            // Wake the consumer; losing this wake-up to a full queue is fine
            // because a full queue is drained promptly anyway.
            let _ = self.tx.try_send(NativeEvent::Overflow);
        }
    }

    fn fail(&self, message: String) {
        error!("{}", message);
        if self.state.failure.set(message.clone()).is_ok() {
            let _ = self.tx.try_send(NativeEvent::Failed(message));
        }
    }
}

impl EventSource {
    /// Wait for the next event
    ///
    /// Failures take priority over everything else, then overflow. Returns
    /// `None` once every sink has been dropped.
    pub(crate) async fn recv(&mut self) -> Option<NativeEvent> {
        loop {
            if let Some(event) = self.flagged() {
                return Some(event);
            }
            match self.rx.recv().await {
                // wake-up markers; the flags carry the state
                Some(NativeEvent::Overflow) | Some(NativeEvent::Failed(_)) => continue,
                other => return other,
            }
        }
    }

    fn flagged(&self) -> Option<NativeEvent> {
        if let Some(message) = self.state.failure.get() {
            return Some(NativeEvent::Failed(message.clone()));
        }
        if self.state.overflowed.swap(false, Ordering::AcqRel) {
            return Some(NativeEvent::Overflow);
        }
        None
    }
}

/// Reads and opens carry no information about directory contents
fn is_noise(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Access(access) if !matches!(access, AccessKind::Close(AccessMode::Write)))
}

fn is_removal(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Remove(_)
            | EventKind::Modify(ModifyKind::Name(RenameMode::From | RenameMode::Any))
    )
}

/// Map a notify registration error to the engine's error taxonomy
fn map_watch_error(err: notify::Error, dir: &Path) -> Error {
    match &err.kind {
        ErrorKind::PathNotFound | ErrorKind::WatchNotFound => Error::path_vanished(dir),
        ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
            Error::path_vanished(dir)
        }
        ErrorKind::MaxFilesWatch => {
            Error::watch_service(format!("Watch limit reached registering {dir:?}"))
        }
        _ => Error::watcher(format!("Failed to watch {dir:?}: {err}")),
    }
}

/// The notify watcher actually in use
pub(crate) enum NotifyBackend {
    Native(RecommendedWatcher),
    Poll(PollWatcher),
}

impl NotifyBackend {
    /// Open the configured backend
    ///
    /// If the native backend cannot be created and the polling fallback is
    /// enabled, a polling watcher is used instead.
    pub(crate) fn open(config: &WatcherConfig, sink: EventSink) -> Result<Self> {
        match config.backend {
            WatchBackend::Poll => Self::poll(config, sink),
            WatchBackend::Native => match Self::native(config, sink.clone()) {
                Ok(backend) => Ok(backend),
                Err(e) if config.polling_fallback => {
                    warn!("Native watcher unavailable ({}), falling back to polling", e);
                    Self::poll(config, sink)
                }
                Err(e) => Err(e),
            },
        }
    }

    fn notify_config(config: &WatcherConfig) -> NotifyConfig {
        NotifyConfig::default()
            .with_poll_interval(config.poll_interval())
            .with_compare_contents(false)
    }

    fn native(config: &WatcherConfig, sink: EventSink) -> Result<Self> {
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<NotifyEvent>| sink.deliver(res),
            Self::notify_config(config),
        )
        .map_err(|e| Error::watch_service(format!("Failed to create native watcher: {e}")))?;

        info!("Native file watcher initialized");
        Ok(Self::Native(watcher))
    }

    fn poll(config: &WatcherConfig, sink: EventSink) -> Result<Self> {
        let watcher = PollWatcher::new(
            move |res: notify::Result<NotifyEvent>| sink.deliver(res),
            Self::notify_config(config),
        )
        .map_err(|e| Error::watch_service(format!("Failed to create polling watcher: {e}")))?;

        info!(
            "Polling file watcher initialized (interval: {:?})",
            config.poll_interval()
        );
        Ok(Self::Poll(watcher))
    }

    /// Which backend ended up being used
    pub(crate) fn kind(&self) -> WatchBackend {
        match self {
            Self::Native(_) => WatchBackend::Native,
            Self::Poll(_) => WatchBackend::Poll,
        }
    }
}

impl DirectoryWatcher for NotifyBackend {
    fn watch_directory(&mut self, dir: &Path) -> Result<()> {
        let result = match self {
            Self::Native(w) => w.watch(dir, RecursiveMode::NonRecursive),
            Self::Poll(w) => w.watch(dir, RecursiveMode::NonRecursive),
        };
        result.map_err(|e| map_watch_error(e, dir))
    }

    fn unwatch_directory(&mut self, dir: &Path) -> Result<()> {
        let result = match self {
            Self::Native(w) => w.unwatch(dir),
            Self::Poll(w) => w.unwatch(dir),
        };
        result.map_err(|e| map_watch_error(e, dir))
    }
}
