//! Error taxonomy for watch setup
//!
//! Only setup failures surface as errors. Observer failures and decode
//! failures end a single session's delivery and are never returned.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for watch operations
pub type Result<T> = std::result::Result<T, WatchError>;

#[derive(Debug, Error)]
pub enum WatchError {
    /// A watched path could not be resolved or stat'ed
    #[error("cannot watch {}: {source}", path.display())]
    Path {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A recursive watch was requested on something that is not a directory
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// A native queue, stream or worker thread could not be created
    #[error("failed to create {what}: {source}")]
    Resource {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    /// The watcher instance already hosts a session; cancel it first
    #[error("watcher already has an active session")]
    SessionActive,

    /// The backend cannot watch a tree; enumerate files and watch them flat
    #[error("recursive watch not supported by the {0} backend")]
    RecursiveUnsupported(&'static str),

    /// Configuration could not be parsed
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl WatchError {
    pub fn path(path: impl Into<PathBuf>, source: io::Error) -> Self {
        WatchError::Path {
            path: path.into(),
            source,
        }
    }

    pub fn resource(what: &'static str, source: io::Error) -> Self {
        WatchError::Resource { what, source }
    }

    /// True when the caller should fall back to enumerate + flat watch
    pub fn is_recursive_unsupported(&self) -> bool {
        matches!(self, WatchError::RecursiveUnsupported(_))
    }
}
