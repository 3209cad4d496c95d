//! Core types shared by the treewatch crates
//!
//! This crate provides the foundational pieces used throughout the
//! treewatch workspace:
//!
//! - **Error handling**: the unified error type and its transient/fatal classification
//! - **Configuration**: layered file and environment configuration
//!

pub mod config;
pub mod error;

// Re-export main types for convenience
pub use config::{Config, WatcherConfig};
pub use error::{Error, Result, ResultExt};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result, ResultExt};
}
