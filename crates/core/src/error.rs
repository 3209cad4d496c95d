use std::path::PathBuf;
use thiserror::Error;

/// Result type for treewatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for treewatch operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O related errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A path disappeared between being discovered and being read
    #[error("Path vanished: {}", .0.display())]
    PathVanished(PathBuf),

    /// The native watch service failed and cannot continue
    #[error("Watch service failure: {0}")]
    WatchService(String),

    /// File watching errors that do not stop the engine
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    /// Creates a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a path-vanished error
    pub fn path_vanished(path: impl Into<PathBuf>) -> Self {
        Self::PathVanished(path.into())
    }

    /// Creates a fatal watch service error
    pub fn watch_service(msg: impl Into<String>) -> Self {
        Self::WatchService(msg.into())
    }

    /// Creates a watcher error
    pub fn watcher(msg: impl Into<String>) -> Self {
        Self::Watcher(msg.into())
    }

    /// Creates an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Adds context to any error
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether the error only affects the current pass and heals on its own
    ///
    /// Vanished paths and unreadable directories fall in this category: the
    /// parent directory's next diff pass reconciles them.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::PathVanished(_) | Self::Watcher(_) => true,
            Self::Io(e) => !matches!(e.kind(), std::io::ErrorKind::OutOfMemory),
            _ => false,
        }
    }

    /// Whether the error leaves the engine unable to continue
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::WatchService(_))
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::with_context(context, e))
    }
}
