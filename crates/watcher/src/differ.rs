//! Turning directory listings into notifications

use crate::events::{ChangeKind, NotificationListener};
use crate::registry::{DeltaEntry, WatchRegistry};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use treewatch_core::error::{Error, Result};

/// Notification counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct EmitCounters {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub directories_diffed: u64,
}

/// Diffs pending directories against their snapshots and reports the result
pub(crate) struct SnapshotDiffer {
    registry: WatchRegistry,
    listener: Arc<dyn NotificationListener>,
    counters: EmitCounters,
    /// Registered directories whose native watch is known to be gone
    stale: HashSet<PathBuf>,
}

impl SnapshotDiffer {
    pub(crate) fn new(registry: WatchRegistry, listener: Arc<dyn NotificationListener>) -> Self {
        Self {
            registry,
            listener,
            counters: EmitCounters::default(),
            stale: HashSet::new(),
        }
    }

    pub(crate) fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    pub(crate) fn counters(&self) -> EmitCounters {
        self.counters
    }

    pub(crate) fn into_registry(self) -> WatchRegistry {
        self.registry
    }

    /// Note that the native watch of `dir` was dropped
    ///
    /// The next diff of `dir` re-arms the watch if the path is a directory
    /// again by then. Unregistered paths are ignored.
    pub(crate) fn mark_stale(&mut self, dir: &Path) {
        if self.registry.contains(dir) {
            trace!("Watch on {:?} is stale", dir);
            self.stale.insert(dir.to_path_buf());
        }
    }

    /// Bring one registered directory's snapshot up to date
    ///
    /// Only watch service failures are returned; everything else is
    /// reconciled on a later pass.
    pub(crate) fn diff_directory(&mut self, dir: &Path) -> Result<()> {
        let Some(previous_identity) = self.registry.get(dir).map(|d| d.identity) else {
            trace!("Skipping {:?}: no longer registered", dir);
            return Ok(());
        };

        let listing = match self.registry.list(dir) {
            Ok(listing) => listing,
            Err(Error::PathVanished(_)) => {
                debug!("Directory {:?} vanished", dir);
                self.retire_directory(dir);
                return Ok(());
            }
            Err(e) => {
                warn!("Cannot list {:?}, keeping previous snapshot: {}", dir, e);
                return Ok(());
            }
        };
        self.counters.directories_diffed += 1;

        // inode numbers are reused, so a removal notice counts even when the
        // identity matches
        let stale = self.stale.remove(dir);
        let recreated = previous_identity.is_some() && listing.identity != previous_identity;
        if stale || recreated {
            debug!("Directory {:?} was replaced, re-arming its watch", dir);
            if let Err(e) = self.registry.rearm(dir) {
                if e.is_fatal() {
                    return Err(e);
                }
                debug!("Re-arming {:?} failed: {}", dir, e);
                self.retire_directory(dir);
                return Ok(());
            }
        }

        let Some(watched) = self.registry.get_mut(dir) else {
            return Ok(());
        };
        let delta = watched.reconcile(listing);
        if !delta.is_empty() {
            trace!(
                "{:?}: {} created, {} updated, {} deleted",
                dir,
                delta.created.len(),
                delta.updated.len(),
                delta.deleted.len()
            );
        }

        // deletions first, so a type change retires the old subtree before
        // the new entry is adopted
        for DeltaEntry { name, is_directory } in delta.deleted {
            let path = dir.join(name);
            self.emit(ChangeKind::Deleted, &path, is_directory);
            if is_directory {
                self.retire_directory(&path);
            }
        }

        for DeltaEntry { name, is_directory } in delta.created {
            let path = dir.join(name);
            self.emit(ChangeKind::Created, &path, is_directory);
            if is_directory {
                self.adopt_directory(&path)?;
            }
        }

        for DeltaEntry { name, is_directory } in delta.updated {
            self.emit(ChangeKind::Updated, &dir.join(name), is_directory);
        }

        self.retry_unregistered(dir)
    }

    /// Drop a directory and everything registered below it, reporting every
    /// tracked entry as deleted
    ///
    /// The directory itself is reported by its parent.
    pub(crate) fn retire_directory(&mut self, dir: &Path) {
        let mut stack = vec![dir.to_path_buf()];

        while let Some(current) = stack.pop() {
            self.stale.remove(&current);
            let Some(watched) = self.registry.cancel(&current) else {
                continue;
            };
            for (name, item) in watched.items {
                let path = current.join(name);
                self.emit(ChangeKind::Deleted, &path, item.is_directory);
                if item.is_directory {
                    stack.push(path);
                }
            }
        }
    }

    /// Register a newly discovered directory and everything below it,
    /// reporting every entry as created
    ///
    /// The directory itself is reported by its parent. Each directory is
    /// watched before it is listed and reported from that same listing.
    pub(crate) fn adopt_directory(&mut self, dir: &Path) -> Result<()> {
        let mut stack = vec![dir.to_path_buf()];

        while let Some(current) = stack.pop() {
            match self.registry.register(&current) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    debug!("Could not register {:?}, will retry: {}", current, e);
                    continue;
                }
            }

            let children: Vec<(PathBuf, bool)> = self
                .registry
                .get(&current)
                .map(|watched| {
                    watched
                        .items
                        .iter()
                        .map(|(name, item)| (current.join(name), item.is_directory))
                        .collect()
                })
                .unwrap_or_default();

            for (path, is_directory) in children {
                self.emit(ChangeKind::Created, &path, is_directory);
                if is_directory {
                    stack.push(path);
                }
            }
        }

        Ok(())
    }

    /// Register known subdirectories whose registration failed earlier
    fn retry_unregistered(&mut self, dir: &Path) -> Result<()> {
        let missing: Vec<PathBuf> = match self.registry.get(dir) {
            Some(watched) => watched
                .subdirectories()
                .map(|name| dir.join(name))
                .filter(|path| !self.registry.contains(path))
                .collect(),
            None => return Ok(()),
        };

        for path in missing {
            debug!("Retrying registration of {:?}", path);
            self.adopt_directory(&path)?;
        }
        Ok(())
    }

    fn emit(&mut self, kind: ChangeKind, path: &Path, is_directory: bool) {
        let Some(relative) = self.registry.relative(path) else {
            warn!("Ignoring change outside the watch root: {:?}", path);
            return;
        };
        let root = self.registry.root();

        trace!("{:?} {:?} (directory: {})", kind, relative, is_directory);
        match kind {
            ChangeKind::Created => {
                self.counters.created += 1;
                self.listener.path_created(root, relative, is_directory);
            }
            ChangeKind::Updated => {
                self.counters.updated += 1;
                self.listener.path_updated(root, relative, is_directory);
            }
            ChangeKind::Deleted => {
                self.counters.deleted += 1;
                self.listener.path_deleted(root, relative, is_directory);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelListener, PathChange, WatchNotification};
    use crate::exclude::ExcludeFilter;
    use crate::registry::tests::{RecordingWatcher, WatchCall};
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        temp_dir: TempDir,
        differ: SnapshotDiffer,
        rx: UnboundedReceiver<WatchNotification>,
        watcher: RecordingWatcher,
    }

    impl Fixture {
        fn new(filter: ExcludeFilter) -> Self {
            let temp_dir = TempDir::new().expect("test setup failed");
            let watcher = RecordingWatcher::default();
            let mut registry = WatchRegistry::new(
                temp_dir.path().to_path_buf(),
                filter,
                Box::new(watcher.clone()),
            );
            registry.register(temp_dir.path()).expect("test setup failed");
            let (listener, rx) = ChannelListener::new();
            Self {
                differ: SnapshotDiffer::new(registry, Arc::new(listener)),
                temp_dir,
                rx,
                watcher,
            }
        }

        fn root(&self) -> PathBuf {
            self.temp_dir.path().to_path_buf()
        }

        fn changes(&mut self) -> Vec<PathChange> {
            let mut changes = Vec::new();
            while let Ok(notification) = self.rx.try_recv() {
                if let WatchNotification::Changed(change) = notification {
                    changes.push(change);
                }
            }
            changes.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
            changes
        }
    }

    #[test]
    fn test_new_subtree_is_reported_and_registered() {
        let mut fixture = Fixture::new(ExcludeFilter::new());
        let root = fixture.root();
        fs::create_dir_all(root.join("a/b")).expect("test setup failed");
        fs::write(root.join("a/one.txt"), "1").expect("test setup failed");
        fs::write(root.join("a/b/two.txt"), "2").expect("test setup failed");

        fixture.differ.diff_directory(&root).expect("diff");

        assert_eq!(
            fixture.changes(),
            vec![
                PathChange::new(ChangeKind::Created, "a", true),
                PathChange::new(ChangeKind::Created, "a/b", true),
                PathChange::new(ChangeKind::Created, "a/b/two.txt", false),
                PathChange::new(ChangeKind::Created, "a/one.txt", false),
            ]
        );
        assert!(fixture.differ.registry().contains(&root.join("a")));
        assert!(fixture.differ.registry().contains(&root.join("a/b")));
        assert_eq!(fixture.differ.counters().created, 4);
    }

    #[test]
    fn test_deleted_subtree_is_reported_once() {
        let mut fixture = Fixture::new(ExcludeFilter::new());
        let root = fixture.root();
        fs::create_dir_all(root.join("a/b")).expect("test setup failed");
        fs::write(root.join("a/b/two.txt"), "2").expect("test setup failed");
        fixture.differ.diff_directory(&root).expect("diff");
        fixture.changes();

        fs::remove_dir_all(root.join("a")).expect("test setup failed");
        // child first, then parent, then the child again
        fixture.differ.diff_directory(&root.join("a/b")).expect("diff");
        fixture.differ.diff_directory(&root).expect("diff");
        fixture.differ.diff_directory(&root.join("a")).expect("diff");

        assert_eq!(
            fixture.changes(),
            vec![
                PathChange::new(ChangeKind::Deleted, "a", true),
                PathChange::new(ChangeKind::Deleted, "a/b", true),
                PathChange::new(ChangeKind::Deleted, "a/b/two.txt", false),
            ]
        );
        assert_eq!(fixture.differ.registry().len(), 1);
        assert_eq!(fixture.watcher.watched.lock().expect("lock").len(), 1);
    }

    #[test]
    fn test_modified_file_is_reported() {
        let mut fixture = Fixture::new(ExcludeFilter::new());
        let root = fixture.root();
        let file = root.join("data.txt");
        fs::write(&file, "v1").expect("test setup failed");
        fixture.differ.diff_directory(&root).expect("diff");
        fixture.changes();

        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&file)
            .and_then(|f| f.set_modified(later))
            .expect("test setup failed");
        fixture.differ.diff_directory(&root).expect("diff");

        assert_eq!(
            fixture.changes(),
            vec![PathChange::new(ChangeKind::Updated, "data.txt", false)]
        );
    }

    #[test]
    fn test_file_replaced_by_directory() {
        let mut fixture = Fixture::new(ExcludeFilter::new());
        let root = fixture.root();
        fs::write(root.join("thing"), "").expect("test setup failed");
        fixture.differ.diff_directory(&root).expect("diff");
        fixture.changes();

        fs::remove_file(root.join("thing")).expect("test setup failed");
        fs::create_dir(root.join("thing")).expect("test setup failed");
        fs::write(root.join("thing/inner.txt"), "").expect("test setup failed");
        fixture.differ.diff_directory(&root).expect("diff");

        let changes = fixture.changes();
        assert_eq!(changes.len(), 3);
        assert!(changes.contains(&PathChange::new(ChangeKind::Deleted, "thing", false)));
        assert!(changes.contains(&PathChange::new(ChangeKind::Created, "thing", true)));
        assert!(changes.contains(&PathChange::new(
            ChangeKind::Created,
            "thing/inner.txt",
            false
        )));
    }

    #[test]
    fn test_watch_limit_stops_the_pass() {
        let mut fixture = Fixture::new(ExcludeFilter::new());
        let root = fixture.root();
        fs::create_dir(root.join("deep")).expect("test setup failed");
        *fixture.watcher.fail_with_limit.lock().expect("lock") = Some(root.join("deep"));

        let err = fixture.differ.diff_directory(&root).expect_err("limit");

        assert!(err.is_fatal());
    }

    #[test]
    fn test_excluded_entries_are_never_reported() {
        let filter = ExcludeFilter::builder()
            .add_pattern("build")
            .build()
            .expect("test setup failed");
        let mut fixture = Fixture::new(filter);
        let root = fixture.root();
        fs::create_dir_all(root.join("build/out")).expect("test setup failed");
        fs::write(root.join("keep.txt"), "").expect("test setup failed");

        fixture.differ.diff_directory(&root).expect("diff");

        assert_eq!(
            fixture.changes(),
            vec![PathChange::new(ChangeKind::Created, "keep.txt", false)]
        );
        assert!(!fixture.differ.registry().contains(&root.join("build")));
    }

    #[test]
    fn test_failed_registration_is_retried() {
        let mut fixture = Fixture::new(ExcludeFilter::new());
        let root = fixture.root();
        fs::create_dir(root.join("late")).expect("test setup failed");
        fs::write(root.join("late/file.txt"), "").expect("test setup failed");
        *fixture.watcher.fail_transiently.lock().expect("lock") = Some(root.join("late"));

        fixture.differ.diff_directory(&root).expect("diff");
        assert!(!fixture.differ.registry().contains(&root.join("late")));
        assert_eq!(
            fixture.changes(),
            vec![PathChange::new(ChangeKind::Created, "late", true)]
        );

        *fixture.watcher.fail_transiently.lock().expect("lock") = None;
        fixture.differ.diff_directory(&root).expect("diff");

        assert_eq!(
            fixture.changes(),
            vec![PathChange::new(ChangeKind::Created, "late/file.txt", false)]
        );
        assert!(fixture.differ.registry().contains(&root.join("late")));
    }

    #[test]
    fn test_recreated_directory_is_rearmed_after_removal() {
        let mut fixture = Fixture::new(ExcludeFilter::new());
        let root = fixture.root();
        let dir = root.join("d");
        fs::create_dir(&dir).expect("test setup failed");
        fs::write(dir.join("old.txt"), "").expect("test setup failed");
        fixture.differ.diff_directory(&root).expect("diff");
        fixture.differ.diff_directory(&dir).expect("diff");
        fixture.changes();
        assert_eq!(fixture.watcher.calls_for(&dir), vec![WatchCall::Watch(dir.clone())]);

        // the new directory may well get the old inode back
        fs::remove_dir_all(&dir).expect("test setup failed");
        fs::create_dir(&dir).expect("test setup failed");
        fs::write(dir.join("new.txt"), "").expect("test setup failed");
        fixture.differ.mark_stale(&dir);
        fixture.differ.diff_directory(&dir).expect("diff");

        assert_eq!(
            fixture.watcher.calls_for(&dir),
            vec![
                WatchCall::Watch(dir.clone()),
                WatchCall::Unwatch(dir.clone()),
                WatchCall::Watch(dir.clone()),
            ]
        );
        assert_eq!(
            fixture.changes(),
            vec![
                PathChange::new(ChangeKind::Created, "d/new.txt", false),
                PathChange::new(ChangeKind::Deleted, "d/old.txt", false),
            ]
        );

        // re-armed once, not on every later pass
        fixture.differ.diff_directory(&dir).expect("diff");
        assert_eq!(fixture.watcher.calls_for(&dir).len(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_with_new_identity_is_rearmed() {
        let mut fixture = Fixture::new(ExcludeFilter::new());
        let root = fixture.root();
        let dir = root.join("d");
        fs::create_dir(&dir).expect("test setup failed");
        fixture.differ.diff_directory(&root).expect("diff");
        fixture.changes();

        // the old directory stays alive, so its inode cannot be reused
        fs::rename(&dir, root.join("kept")).expect("test setup failed");
        fs::create_dir(&dir).expect("test setup failed");
        fixture.differ.diff_directory(&dir).expect("diff");

        assert_eq!(
            fixture.watcher.calls_for(&dir),
            vec![
                WatchCall::Watch(dir.clone()),
                WatchCall::Unwatch(dir.clone()),
                WatchCall::Watch(dir.clone()),
            ]
        );
    }

    #[test]
    fn test_stale_mark_on_vanished_directory_retires_it() {
        let mut fixture = Fixture::new(ExcludeFilter::new());
        let root = fixture.root();
        let dir = root.join("d");
        fs::create_dir(&dir).expect("test setup failed");
        fixture.differ.diff_directory(&root).expect("diff");

        fs::remove_dir(&dir).expect("test setup failed");
        fixture.differ.mark_stale(&dir);
        fixture.differ.diff_directory(&dir).expect("diff");

        assert!(!fixture.differ.registry().contains(&dir));
        assert!(fixture.differ.stale.is_empty());
    }

    #[test]
    fn test_unchanged_directory_keeps_its_watch() {
        let mut fixture = Fixture::new(ExcludeFilter::new());
        let root = fixture.root();
        fs::write(root.join("a.txt"), "").expect("test setup failed");

        fixture.differ.diff_directory(&root).expect("diff");
        fixture.differ.diff_directory(&root).expect("diff");

        assert_eq!(fixture.watcher.calls_for(&root), vec![WatchCall::Watch(root.clone())]);
    }
}
