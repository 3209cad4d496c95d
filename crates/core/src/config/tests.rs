//! Tests for configuration module

use super::*;
use crate::error::{Error, Result};
use pretty_assertions::assert_eq;
use std::io::Write;
use tempfile::NamedTempFile;

fn create_temp_config_file(content: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .map_err(|e| Error::config(format!("Failed to create temp file: {e}")))?;
    file.write_all(content.as_bytes())
        .map_err(|e| Error::config(format!("Failed to write temp file: {e}")))?;
    file.flush()
        .map_err(|e| Error::config(format!("Failed to flush temp file: {e}")))?;
    Ok(file)
}

fn with_env_var<F, T>(key: &str, value: &str, f: F) -> T
where
    F: FnOnce() -> T,
{
    std::env::set_var(key, value);
    let result = f();
    std::env::remove_var(key);
    result
}

#[test]
fn test_from_toml_str_valid() {
    let toml = r#"
        [watcher]
        root = "/srv/project"
        exclude_patterns = ["target", "**/*.log"]
        coalesce_timeout_ms = 500
        backend = "poll"
        poll_interval_ms = 250
    "#;

    let config = Config::from_toml_str(toml).expect("Failed to parse valid TOML");
    assert_eq!(config.watcher.root, Some(PathBuf::from("/srv/project")));
    assert_eq!(config.watcher.exclude_patterns, vec!["target", "**/*.log"]);
    assert_eq!(config.watcher.coalesce_timeout_ms, 500);
    assert_eq!(config.watcher.backend, "poll");
    assert_eq!(config.watcher.poll_interval_ms, 250);
    assert!(config.validate().is_ok());
}

#[test]
fn test_from_toml_str_minimal() {
    let config = Config::from_toml_str("").expect("Failed to parse empty TOML");

    assert_eq!(config.watcher.root, None);
    assert!(config.watcher.exclude_patterns.is_empty());
    assert_eq!(config.watcher.coalesce_timeout_ms, 2000);
    assert_eq!(config.watcher.max_coalesce_delay_ms, 10_000);
    assert_eq!(config.watcher.shutdown_grace_ms, 3000);
    assert_eq!(config.watcher.backend, "native");
    assert!(config.watcher.polling_fallback);
    assert_eq!(config.watcher.event_queue_capacity, 100_000);
    assert!(config.validate().is_ok());
}

#[test]
fn test_from_toml_str_invalid() {
    let err = Config::from_toml_str("[watcher]\ncoalesce_timeout_ms = \"soon\"")
        .expect_err("string is not a duration");
    assert!(matches!(err, Error::WithContext { .. }));
    assert!(err.to_string().starts_with("Failed to parse TOML: "));
}

#[test]
fn test_validate_rejects_unknown_backend() {
    let mut config = Config::default();
    config.watcher.backend = "fanotify".to_string();

    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("Invalid backend 'fanotify'"));
}

#[test]
fn test_validate_rejects_zero_timeout() {
    let mut config = Config::default();
    config.watcher.coalesce_timeout_ms = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_delay_shorter_than_timeout() {
    let mut config = Config::default();
    config.watcher.coalesce_timeout_ms = 5000;
    config.watcher.max_coalesce_delay_ms = 1000;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_bad_pattern() {
    let mut config = Config::default();
    config.watcher.exclude_patterns = vec!["[unclosed".to_string()];

    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("Invalid exclude pattern"));
}

#[test]
fn test_from_file_reads_toml() {
    let file = create_temp_config_file(
        r#"
        [watcher]
        excluded_dirs = [".git", "node_modules"]
        shutdown_grace_ms = 1500
        "#,
    )
    .expect("test setup failed");

    let config = Config::from_file(file.path()).expect("Failed to load config file");
    assert_eq!(config.watcher.excluded_dirs, vec![".git", "node_modules"]);
    assert_eq!(config.watcher.shutdown_grace_ms, 1500);
    assert_eq!(config.watcher.coalesce_timeout_ms, 2000);
}

#[test]
fn test_from_file_missing_uses_defaults() {
    let dir = tempfile::tempdir().expect("test setup failed");
    let config =
        Config::from_file(&dir.path().join("absent.toml")).expect("Failed to load defaults");
    assert_eq!(config.watcher.coalesce_timeout_ms, 2000);
    assert!(config.watcher.exclude_patterns.is_empty());
}

#[test]
fn test_env_overrides_file() {
    let file = create_temp_config_file("[watcher]\nbackend = \"native\"\n")
        .expect("test setup failed");

    let config = with_env_var("TREEWATCH_WATCHER__BACKEND", "poll", || {
        Config::from_file(file.path())
    })
    .expect("Failed to load config with env override");

    assert_eq!(config.watcher.backend, "poll");
}
