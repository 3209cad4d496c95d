#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

//! Recursive change notifications for a directory tree
//!
//! This crate watches every directory below a root and reports each entry
//! that is created, modified or deleted exactly once:
//! - One non-recursive native watch per directory, with a polling fallback
//! - Bursts of notifications coalesced per directory before diffing
//! - Directory snapshots diffed to decide what actually changed
//! - Glob, directory-name and predicate exclusions applied to whole subtrees
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use treewatch_watcher::{ChannelListener, FileTreeWatcher, WatcherConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WatcherConfig::builder()
//!     .add_excluded_dir(".git")
//!     .add_exclude_pattern("target")
//!     .build();
//! let (listener, mut notifications) = ChannelListener::new();
//!
//! let mut watcher = FileTreeWatcher::new("/path/to/project", config, Arc::new(listener))?;
//! watcher.start().await?;
//!
//! while let Some(notification) = notifications.recv().await {
//!     println!("{notification:?}");
//! }
//!
//! watcher.shutdown().await;
//! # Ok(())
//! # }
//! ```

// Private implementation modules
mod backend;
mod collector;
mod config;
mod differ;
mod events;
mod exclude;
mod registry;
mod walker;
mod watcher;

// Public exports
pub use collector::{SnapshotEntry, WatchStats};
pub use config::{WatchBackend, WatcherConfig, WatcherConfigBuilder};
pub use events::{ChangeKind, ChannelListener, NotificationListener, PathChange, WatchNotification};
pub use exclude::{ExcludeFilter, ExcludeFilterBuilder, ExcludeMatcher};
pub use walker::{TreeWalker, VisitedEntry};
pub use watcher::FileTreeWatcher;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::WatcherConfig;
    pub use crate::events::{ChannelListener, NotificationListener, WatchNotification};
    pub use crate::watcher::FileTreeWatcher;
}
