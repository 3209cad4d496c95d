//! Configuration module for treewatch
//!
//! This module provides configuration structures and loading mechanisms.
//! Configuration can be loaded from TOML files and/or environment variables.

mod defaults;
mod loading;

#[cfg(test)]
mod tests;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use defaults::*;

/// Returns the path to the global configuration file
///
/// The global config is stored at `~/.treewatch/config.toml`.
pub fn global_config_path() -> Result<PathBuf> {
    let home_dir = dirs::home_dir()
        .ok_or_else(|| Error::config("Unable to determine home directory".to_string()))?;
    Ok(home_dir.join(".treewatch").join("config.toml"))
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// File tree watcher configuration
    #[serde(default)]
    pub watcher: WatcherConfig,
}

/// Configuration for the tree watcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Directory to watch when none is given on the command line
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Glob patterns (relative to the root) to exclude
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Directory names excluded wherever they appear
    #[serde(default)]
    pub excluded_dirs: Vec<String>,

    /// Idle time after the last notification before pending directories are diffed
    #[serde(default = "default_coalesce_timeout_ms")]
    pub coalesce_timeout_ms: u64,

    /// Upper bound on how long a pending directory may wait for its diff pass
    #[serde(default = "default_max_coalesce_delay_ms")]
    pub max_coalesce_delay_ms: u64,

    /// Time granted to the worker to stop before it is aborted
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Notification backend: "native" or "poll"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Poll interval for the polling backend
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Fall back to polling when the native backend cannot be created
    #[serde(default = "default_polling_fallback")]
    pub polling_fallback: bool,

    /// Capacity of the native event queue
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            root: None,
            exclude_patterns: Vec::new(),
            excluded_dirs: Vec::new(),
            coalesce_timeout_ms: default_coalesce_timeout_ms(),
            max_coalesce_delay_ms: default_max_coalesce_delay_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            backend: default_backend(),
            poll_interval_ms: default_poll_interval_ms(),
            polling_fallback: default_polling_fallback(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let watcher = &self.watcher;

        if !VALID_BACKENDS.contains(&watcher.backend.as_str()) {
            return Err(Error::config(format!(
                "Invalid backend '{}'. Must be one of: {:?}",
                watcher.backend, VALID_BACKENDS
            )));
        }

        if watcher.coalesce_timeout_ms == 0 {
            return Err(Error::config(
                "watcher.coalesce_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if watcher.max_coalesce_delay_ms < watcher.coalesce_timeout_ms {
            return Err(Error::config(format!(
                "watcher.max_coalesce_delay_ms ({}) must not be shorter than watcher.coalesce_timeout_ms ({})",
                watcher.max_coalesce_delay_ms, watcher.coalesce_timeout_ms
            )));
        }

        if watcher.backend == "poll" && watcher.poll_interval_ms == 0 {
            return Err(Error::config(
                "watcher.poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if watcher.event_queue_capacity == 0 {
            return Err(Error::config(
                "watcher.event_queue_capacity must be greater than 0".to_string(),
            ));
        }

        for pattern in &watcher.exclude_patterns {
            glob::Pattern::new(pattern).map_err(|e| {
                Error::config(format!("Invalid exclude pattern '{pattern}': {e}"))
            })?;
        }

        Ok(())
    }
}
