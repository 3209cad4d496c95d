//! Library interface for the treewatch CLI
//!
//! This module exposes the pieces of the binary that are worth testing on
//! their own while keeping the command dispatch in main.rs.

pub mod listener;
pub mod options;

pub use listener::LoggingListener;
pub use options::{resolve_watch_settings, WatchOverrides};
