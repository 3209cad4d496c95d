//! Configuration types for the tree watcher
//!
//! This module provides the immutable configuration the engine is built
//! from, along with its builder and the conversion from file settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use treewatch_core::config::WatcherConfig as WatcherSettings;
use treewatch_core::error::{Error, Result};

/// Which notification mechanism feeds the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchBackend {
    /// Platform notifier (inotify, FSEvents, ReadDirectoryChangesW, kqueue)
    Native,
    /// Periodic stat-based scan of every registered directory
    Poll,
}

impl std::str::FromStr for WatchBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "native" => Ok(Self::Native),
            "poll" => Ok(Self::Poll),
            other => Err(Error::config(format!(
                "Invalid backend '{other}'. Must be one of: [\"native\", \"poll\"]"
            ))),
        }
    }
}

/// Immutable configuration for the tree watcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Glob patterns, relative to the watch root, that are excluded (default: none)
    pub exclude_patterns: Vec<String>,
    /// Directory names excluded wherever they appear (default: none)
    pub excluded_dirs: Vec<String>,
    /// Idle time before pending directories are diffed (default: 2000ms)
    pub coalesce_timeout_ms: u64,
    /// Longest a pending directory may wait under continuous activity (default: 10000ms)
    pub max_coalesce_delay_ms: u64,
    /// Grace period for the worker to stop on shutdown (default: 3000ms)
    pub shutdown_grace_ms: u64,
    /// Notification backend (default: native)
    pub backend: WatchBackend,
    /// Poll interval for the polling backend (default: 2000ms)
    pub poll_interval_ms: u64,
    /// Use polling if the native backend cannot be created (default: true)
    pub polling_fallback: bool,
    /// Capacity of the native event queue (default: 100000)
    pub event_queue_capacity: usize,
}

impl WatcherConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from builder
    pub fn builder() -> WatcherConfigBuilder {
        WatcherConfigBuilder::default()
    }

    /// Build the engine configuration from file/environment settings
    pub fn from_settings(settings: &WatcherSettings) -> Result<Self> {
        Ok(Self {
            exclude_patterns: settings.exclude_patterns.clone(),
            excluded_dirs: settings.excluded_dirs.clone(),
            coalesce_timeout_ms: settings.coalesce_timeout_ms,
            max_coalesce_delay_ms: settings.max_coalesce_delay_ms,
            shutdown_grace_ms: settings.shutdown_grace_ms,
            backend: settings.backend.parse()?,
            poll_interval_ms: settings.poll_interval_ms,
            polling_fallback: settings.polling_fallback,
            event_queue_capacity: settings.event_queue_capacity,
        })
    }

    /// Get the coalescing idle timeout
    pub fn coalesce_timeout(&self) -> Duration {
        Duration::from_millis(self.coalesce_timeout_ms)
    }

    /// Get the maximum coalescing delay
    pub fn max_coalesce_delay(&self) -> Duration {
        Duration::from_millis(self.max_coalesce_delay_ms.max(self.coalesce_timeout_ms))
    }

    /// Get the shutdown grace period
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Get the poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.coalesce_timeout_ms == 0 {
            return Err(Error::config("coalesce_timeout_ms must be greater than 0"));
        }
        if self.event_queue_capacity == 0 {
            return Err(Error::config("event_queue_capacity must be greater than 0"));
        }
        if self.backend == WatchBackend::Poll && self.poll_interval_ms == 0 {
            return Err(Error::config("poll_interval_ms must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            exclude_patterns: Vec::new(),
            excluded_dirs: Vec::new(),
            coalesce_timeout_ms: 2000,
            max_coalesce_delay_ms: 10_000,
            shutdown_grace_ms: 3000,
            backend: WatchBackend::Native,
            poll_interval_ms: 2000,
            polling_fallback: true,
            event_queue_capacity: 100_000,
        }
    }
}

/// Builder for WatcherConfig
#[derive(Debug, Default)]
pub struct WatcherConfigBuilder {
    config: WatcherConfig,
}

impl WatcherConfigBuilder {
    /// Set exclude patterns
    pub fn exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.exclude_patterns = patterns;
        self
    }

    /// Add an exclude pattern
    pub fn add_exclude_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.exclude_patterns.push(pattern.into());
        self
    }

    /// Add a directory name excluded at any depth
    pub fn add_excluded_dir(mut self, name: impl Into<String>) -> Self {
        self.config.excluded_dirs.push(name.into());
        self
    }

    /// Set the coalescing idle timeout in milliseconds
    pub fn coalesce_timeout_ms(mut self, ms: u64) -> Self {
        self.config.coalesce_timeout_ms = ms;
        self
    }

    /// Set the maximum coalescing delay in milliseconds
    pub fn max_coalesce_delay_ms(mut self, ms: u64) -> Self {
        self.config.max_coalesce_delay_ms = ms;
        self
    }

    /// Set the shutdown grace period in milliseconds
    pub fn shutdown_grace_ms(mut self, ms: u64) -> Self {
        self.config.shutdown_grace_ms = ms;
        self
    }

    /// Set the notification backend
    pub fn backend(mut self, backend: WatchBackend) -> Self {
        self.config.backend = backend;
        self
    }

    /// Set the poll interval in milliseconds
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Enable or disable the polling fallback
    pub fn polling_fallback(mut self, enable: bool) -> Self {
        self.config.polling_fallback = enable;
        self
    }

    /// Set the native event queue capacity
    pub fn event_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.event_queue_capacity = capacity;
        self
    }

    /// Build the configuration
    pub fn build(self) -> WatcherConfig {
        self.config
    }
}
