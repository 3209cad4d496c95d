//! Depth-first traversal of the watched tree
//!
//! The walk is driven by `walkdir`'s explicit stack, so pathological nesting
//! cannot exhaust the call stack. Excluded directories are pruned before
//! they are descended into.

use crate::exclude::ExcludeFilter;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// One entry produced by the walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitedEntry {
    /// Absolute path
    pub path: PathBuf,
    /// Path relative to the walk root
    pub relative_path: PathBuf,
    /// Whether the entry is a directory (symlinks are not followed)
    pub is_directory: bool,
    /// Last modification time, when the platform reports one
    pub modified: Option<SystemTime>,
}

impl VisitedEntry {
    fn from_dir_entry(root: &Path, entry: DirEntry) -> Self {
        let relative_path = entry
            .path()
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let modified = entry.metadata().ok().and_then(|m| m.modified().ok());
        Self {
            is_directory: entry.file_type().is_dir(),
            relative_path,
            modified,
            path: entry.into_path(),
        }
    }
}

/// Lazy pre-order walk over every observable entry below a root
#[derive(Debug, Clone)]
pub struct TreeWalker {
    root: PathBuf,
    filter: ExcludeFilter,
    directories_only: bool,
    include_root: bool,
}

impl TreeWalker {
    /// Walk everything below `root` that `filter` accepts
    pub fn new(root: impl Into<PathBuf>, filter: ExcludeFilter) -> Self {
        Self {
            root: root.into(),
            filter,
            directories_only: false,
            include_root: false,
        }
    }

    /// Yield directories only
    pub fn directories_only(mut self) -> Self {
        self.directories_only = true;
        self
    }

    /// Yield the root itself as the first entry
    pub fn include_root(mut self) -> Self {
        self.include_root = true;
        self
    }

    /// Iterate the tree
    ///
    /// Entries that vanish or cannot be read during the walk are skipped.
    pub fn walk(&self) -> impl Iterator<Item = VisitedEntry> + '_ {
        let min_depth = if self.include_root { 0 } else { 1 };

        WalkDir::new(&self.root)
            .follow_links(false)
            .min_depth(min_depth)
            .into_iter()
            .filter_entry(move |entry| {
                let relative = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
                self.filter.should_notify(relative)
            })
            .filter_map(|result| match result {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Skipping unreadable entry during walk: {e}");
                    None
                }
            })
            .filter(move |entry| !self.directories_only || entry.file_type().is_dir())
            .map(move |entry| VisitedEntry::from_dir_entry(&self.root, entry))
    }
}
