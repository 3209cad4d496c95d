//! Configuration loading from files and environment variables

use crate::error::{Result, ResultExt};
use config::{Config as ConfigLib, Environment, File};
use std::path::Path;
use tracing::debug;

use super::{global_config_path, Config};

impl Config {
    /// Loads configuration from a TOML file with environment variable overrides
    ///
    /// Environment variables are prefixed with `TREEWATCH_` and use double underscores
    /// for nested values. For example:
    /// - `TREEWATCH_WATCHER__BACKEND=poll`
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut builder = ConfigLib::builder();

        // Add the config file if it exists
        if path.exists() {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(File::from(path));
        }

        // Add environment variables with TREEWATCH_ prefix
        builder = builder.add_source(
            Environment::with_prefix("TREEWATCH")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("watcher.exclude_patterns")
                .with_list_parse_key("watcher.excluded_dirs")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .context(format!("Failed to build config from {}", path.display()))?;

        config
            .try_deserialize()
            .context("Failed to deserialize config")
    }

    /// Creates a config from a TOML string (useful for testing)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML")
    }

    /// Load configuration from a single file
    ///
    /// Precedence (lowest to highest):
    /// 1. Hardcoded defaults
    /// 2. Config file (~/.treewatch/config.toml or custom --config path)
    /// 3. Environment variables (TREEWATCH_*)
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = match config_path {
            Some(p) => p.to_path_buf(),
            None => global_config_path()?,
        };
        Self::from_file(&path)
    }
}
