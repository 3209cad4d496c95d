//! Merging command-line overrides into the loaded configuration

use anyhow::{Context, Result};
use std::path::PathBuf;
use treewatch_core::config::Config;
use treewatch_watcher::WatcherConfig;

/// Settings given on the command line, which win over the config file
#[derive(Debug, Clone, Default)]
pub struct WatchOverrides {
    /// Directory to watch
    pub root: Option<PathBuf>,
    /// Extra exclude patterns, appended to the configured ones
    pub exclude: Vec<String>,
    /// Force the polling backend
    pub poll: bool,
    /// Coalescing idle timeout
    pub coalesce_ms: Option<u64>,
}

/// Resolve the watch root and the engine configuration
pub fn resolve_watch_settings(
    mut config: Config,
    overrides: WatchOverrides,
) -> Result<(PathBuf, WatcherConfig)> {
    let settings = &mut config.watcher;

    let root = overrides
        .root
        .or_else(|| settings.root.clone())
        .context("No directory to watch: pass ROOT or set watcher.root in the config file")?;

    settings.exclude_patterns.extend(overrides.exclude);
    if overrides.poll {
        settings.backend = "poll".to_string();
    }
    if let Some(ms) = overrides.coalesce_ms {
        settings.coalesce_timeout_ms = ms;
        settings.max_coalesce_delay_ms = settings.max_coalesce_delay_ms.max(ms);
    }

    config.validate().context("Invalid configuration")?;
    let watcher_config = WatcherConfig::from_settings(&config.watcher)?;
    Ok((root, watcher_config))
}
