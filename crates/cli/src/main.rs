//! treewatch CLI - recursive directory change notifications
//!
//! This binary watches a directory tree and logs every entry that is
//! created, modified or deleted.

#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use treewatch::{resolve_watch_settings, LoggingListener, WatchOverrides};
use treewatch_core::config::Config;
use treewatch_watcher::FileTreeWatcher;

/// How often the main task checks that the watcher is still alive
const LIVENESS_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "treewatch")]
#[command(about = "Recursive directory tree change notifications")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a directory tree until interrupted
    Watch(WatchArgs),
}

#[derive(Args)]
struct WatchArgs {
    /// Directory to watch (defaults to watcher.root from the config file)
    root: Option<PathBuf>,

    /// Glob pattern to exclude, relative to the root (repeatable)
    #[arg(short, long, value_name = "PATTERN")]
    exclude: Vec<String>,

    /// Use the polling backend instead of native notifications
    #[arg(long)]
    poll: bool,

    /// Idle time before pending changes are reported
    #[arg(long, value_name = "MS")]
    coalesce_ms: Option<u64>,

    /// Print watcher statistics as TOML on exit
    #[arg(long)]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose)?;

    match cli.command {
        Some(Commands::Watch(args)) => watch(args, cli.config.as_deref()).await,
        None => {
            println!("Run 'treewatch watch <ROOT>' to watch a directory tree, or --help for more options");
            Ok(())
        }
    }
}

/// Initialize logging system
///
/// `RUST_LOG` takes precedence over the verbosity flag.
fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={level},treewatch_watcher={level},treewatch_core={level}",
            env!("CARGO_PKG_NAME")
        ))
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    Ok(())
}

/// Watch until Ctrl-C or until the watcher fails
async fn watch(args: WatchArgs, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path).context("Failed to load configuration")?;
    let overrides = WatchOverrides {
        root: args.root,
        exclude: args.exclude,
        poll: args.poll,
        coalesce_ms: args.coalesce_ms,
    };
    let (root, watcher_config) = resolve_watch_settings(config, overrides)?;
    debug!("Watcher configuration: {:?}", watcher_config);

    let listener = Arc::new(LoggingListener::new());
    let mut watcher = FileTreeWatcher::new(&root, watcher_config, listener.clone())
        .with_context(|| format!("Cannot watch {}", root.display()))?;
    watcher.start().await.context("Failed to start watcher")?;

    let failed = wait_for_exit(&watcher).await?;

    if args.stats && !failed {
        let stats = watcher.stats().await?;
        println!("{}", toml::to_string_pretty(&stats)?);
    }
    watcher.shutdown().await;

    let (created, updated, deleted) = listener.totals();
    info!("{created} created, {updated} updated, {deleted} deleted");

    if failed {
        bail!("Watcher stopped after a watch service failure");
    }
    Ok(())
}

/// Returns true if the watcher died on its own
async fn wait_for_exit(watcher: &FileTreeWatcher) -> Result<bool> {
    let mut liveness = tokio::time::interval(LIVENESS_INTERVAL);

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Interrupted, shutting down");
                return Ok(false);
            }
            _ = liveness.tick() => {
                if !watcher.is_running() {
                    return Ok(true);
                }
            }
        }
    }
}
