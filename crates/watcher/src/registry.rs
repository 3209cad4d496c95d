//! Registered directories and their snapshots
//!
//! Every watched directory carries the items seen in its most recent listing.
//! A diff pass bumps the directory's generation and stamps every listed item
//! with it; whatever is left with an older stamp has disappeared.

use crate::backend::DirectoryWatcher;
use crate::exclude::ExcludeFilter;
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, trace, warn};
use treewatch_core::error::{Error, Result};

/// Filesystem identity of a directory
///
/// Lets a directory that was deleted and recreated under the same path be
/// told apart from the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DirectoryIdentity {
    device: u64,
    inode: u64,
}

impl DirectoryIdentity {
    #[cfg(unix)]
    fn from_metadata(metadata: &fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            device: metadata.dev(),
            inode: metadata.ino(),
        })
    }

    #[cfg(not(unix))]
    fn from_metadata(_metadata: &fs::Metadata) -> Option<Self> {
        None
    }
}

/// One entry as seen by a single listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ListedEntry {
    pub is_directory: bool,
    pub modified: Option<SystemTime>,
}

/// The observable entries of a directory at one point in time
#[derive(Debug, Clone, Default)]
pub(crate) struct DirectoryListing {
    pub identity: Option<DirectoryIdentity>,
    pub entries: BTreeMap<OsString, ListedEntry>,
}

/// A tracked entry of a watched directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DirectoryItem {
    pub is_directory: bool,
    pub modified: Option<SystemTime>,
    /// Generation of the last listing that contained this item
    pub seen_generation: u64,
}

impl DirectoryItem {
    fn observed(entry: ListedEntry, generation: u64) -> Self {
        Self {
            is_directory: entry.is_directory,
            modified: entry.modified,
            seen_generation: generation,
        }
    }
}

/// A named entry in a [`DirectoryDelta`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DeltaEntry {
    pub name: OsString,
    pub is_directory: bool,
}

impl DeltaEntry {
    fn new(name: impl Into<OsString>, is_directory: bool) -> Self {
        Self {
            name: name.into(),
            is_directory,
        }
    }
}

/// What changed in a directory between two listings
///
/// An entry whose type changed appears in both `deleted` (old type) and
/// `created` (new type).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DirectoryDelta {
    pub created: Vec<DeltaEntry>,
    pub updated: Vec<DeltaEntry>,
    pub deleted: Vec<DeltaEntry>,
}

impl DirectoryDelta {
    pub(crate) fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// A registered directory
#[derive(Debug, Clone, Default)]
pub(crate) struct WatchedDirectory {
    pub items: BTreeMap<OsString, DirectoryItem>,
    pub generation: u64,
    pub identity: Option<DirectoryIdentity>,
}

impl WatchedDirectory {
    /// Snapshot a directory without reporting anything
    fn from_listing(listing: DirectoryListing) -> Self {
        let mut directory = Self::default();
        directory.reconcile(listing);
        directory
    }

    /// Apply a fresh listing and report the differences
    ///
    /// Modification times only matter for regular files and are compared
    /// exactly.
    pub(crate) fn reconcile(&mut self, listing: DirectoryListing) -> DirectoryDelta {
        self.generation += 1;
        self.identity = listing.identity;
        let generation = self.generation;
        let mut delta = DirectoryDelta::default();

        for (name, entry) in listing.entries {
            match self.items.get_mut(&name) {
                Some(item) if item.is_directory == entry.is_directory => {
                    if !item.is_directory && item.modified != entry.modified {
                        delta.updated.push(DeltaEntry::new(name.clone(), false));
                    }
                    item.modified = entry.modified;
                    item.seen_generation = generation;
                }
                Some(item) => {
                    delta
                        .deleted
                        .push(DeltaEntry::new(name.clone(), item.is_directory));
                    *item = DirectoryItem::observed(entry, generation);
                    delta.created.push(DeltaEntry::new(name, entry.is_directory));
                }
                None => {
                    self.items
                        .insert(name.clone(), DirectoryItem::observed(entry, generation));
                    delta.created.push(DeltaEntry::new(name, entry.is_directory));
                }
            }
        }

        self.items.retain(|name, item| {
            let fresh = item.seen_generation == generation;
            if !fresh {
                delta.deleted.push(DeltaEntry::new(name.clone(), item.is_directory));
            }
            fresh
        });

        delta
    }

    /// Names of tracked subdirectories
    pub(crate) fn subdirectories(&self) -> impl Iterator<Item = &OsString> + '_ {
        self.items
            .iter()
            .filter(|(_, item)| item.is_directory)
            .map(|(name, _)| name)
    }
}

fn listing_error(dir: &Path, err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => Error::path_vanished(dir),
        _ => Error::Io(err),
    }
}

/// Every registered directory, keyed by absolute path
pub(crate) struct WatchRegistry {
    root: PathBuf,
    filter: ExcludeFilter,
    watcher: Box<dyn DirectoryWatcher>,
    directories: HashMap<PathBuf, WatchedDirectory>,
}

impl WatchRegistry {
    pub(crate) fn new(root: PathBuf, filter: ExcludeFilter, watcher: Box<dyn DirectoryWatcher>) -> Self {
        Self {
            root,
            filter,
            watcher,
            directories: HashMap::new(),
        }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    /// Path relative to the root, or `None` for paths outside it
    pub(crate) fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(&self.root).ok()
    }

    pub(crate) fn contains(&self, dir: &Path) -> bool {
        self.directories.contains_key(dir)
    }

    pub(crate) fn get(&self, dir: &Path) -> Option<&WatchedDirectory> {
        self.directories.get(dir)
    }

    pub(crate) fn get_mut(&mut self, dir: &Path) -> Option<&mut WatchedDirectory> {
        self.directories.get_mut(dir)
    }

    /// Registered directories, parents before children
    pub(crate) fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.directories.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub(crate) fn directories(&self) -> impl Iterator<Item = (&PathBuf, &WatchedDirectory)> + '_ {
        self.directories.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.directories.len()
    }

    pub(crate) fn tracked_entries(&self) -> usize {
        self.directories.values().map(|d| d.items.len()).sum()
    }

    /// List the observable entries of `dir`
    pub(crate) fn list(&self, dir: &Path) -> Result<DirectoryListing> {
        let metadata = fs::symlink_metadata(dir).map_err(|e| listing_error(dir, e))?;
        if !metadata.is_dir() {
            return Err(Error::path_vanished(dir));
        }

        let relative_dir = self.relative(dir).unwrap_or(dir).to_path_buf();
        let mut entries = BTreeMap::new();

        for entry in fs::read_dir(dir).map_err(|e| listing_error(dir, e))? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry in {:?}: {}", dir, e);
                    continue;
                }
            };
            let name = entry.file_name();
            if !self.filter.should_notify(&relative_dir.join(&name)) {
                continue;
            }
            // does not follow symlinks
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    trace!("Entry {:?} vanished while listing: {}", entry.path(), e);
                    continue;
                }
            };
            entries.insert(
                name,
                ListedEntry {
                    is_directory: metadata.is_dir(),
                    modified: metadata.modified().ok(),
                },
            );
        }

        Ok(DirectoryListing {
            identity: DirectoryIdentity::from_metadata(&metadata),
            entries,
        })
    }

    /// Watch `dir` and snapshot its contents without reporting them
    ///
    /// Returns `false` if the directory was already registered. The watch is
    /// placed before the listing, so nothing created after the listing can
    /// slip by unnoticed.
    pub(crate) fn register(&mut self, dir: &Path) -> Result<bool> {
        if self.contains(dir) {
            return Ok(false);
        }

        self.watcher.watch_directory(dir)?;
        let listing = match self.list(dir) {
            Ok(listing) => listing,
            Err(e) => {
                if let Err(unwatch_err) = self.watcher.unwatch_directory(dir) {
                    trace!("Unwatch after failed listing of {:?}: {}", dir, unwatch_err);
                }
                return Err(e);
            }
        };

        trace!("Registered {:?} ({} entries)", dir, listing.entries.len());
        self.directories
            .insert(dir.to_path_buf(), WatchedDirectory::from_listing(listing));
        Ok(true)
    }

    /// Replace the native watch of a directory that was recreated in place
    pub(crate) fn rearm(&mut self, dir: &Path) -> Result<()> {
        if let Err(e) = self.watcher.unwatch_directory(dir) {
            trace!("Stale watch on {:?} already gone: {}", dir, e);
        }
        self.watcher.watch_directory(dir)
    }

    /// Stop watching `dir` and hand back its snapshot
    pub(crate) fn cancel(&mut self, dir: &Path) -> Option<WatchedDirectory> {
        let directory = self.directories.remove(dir)?;
        if let Err(e) = self.watcher.unwatch_directory(dir) {
            // the kernel drops watches of deleted directories on its own
            trace!("Unwatch {:?}: {}", dir, e);
        }
        Some(directory)
    }

    /// Stop watching everything; returns how many watches were cancelled
    pub(crate) fn cancel_all(&mut self) -> usize {
        let count = self.directories.len();
        for (dir, _) in self.directories.drain() {
            if let Err(e) = self.watcher.unwatch_directory(&dir) {
                warn!("Failed to cancel watch on {:?}: {}", dir, e);
            }
        }
        count
    }
}
