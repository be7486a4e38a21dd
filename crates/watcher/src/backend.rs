//! Backend selection and the shared setup helpers

use crate::poll::PollBackend;
use crate::session::{CancelHandle, EventSink};
use fswatch_core::{Result, WatchError};
use std::fmt;
use std::path::{Path, PathBuf};

#[cfg(target_os = "macos")]
use crate::platform::macos::FsEventsBackend;
#[cfg(target_os = "linux")]
use crate::platform::linux::InotifyBackend;

/// Which engine a [`Watcher`](crate::Watcher) runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Inotify,
    FsEvents,
    Poll,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Inotify => "inotify",
            BackendKind::FsEvents => "fsevents",
            BackendKind::Poll => "poll",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of watcher engines
///
/// Every variant takes canonical paths and a sink that already rewrites
/// paths for the caller.
pub(crate) enum Backend {
    #[cfg(target_os = "linux")]
    Inotify(InotifyBackend),
    #[cfg(target_os = "macos")]
    FsEvents(FsEventsBackend),
    Poll(PollBackend),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            #[cfg(target_os = "linux")]
            Backend::Inotify(_) => BackendKind::Inotify,
            #[cfg(target_os = "macos")]
            Backend::FsEvents(_) => BackendKind::FsEvents,
            Backend::Poll(_) => BackendKind::Poll,
        }
    }

    pub fn watch_files(&self, paths: Vec<PathBuf>, sink: EventSink) -> Result<CancelHandle> {
        match self {
            #[cfg(target_os = "linux")]
            Backend::Inotify(b) => b.watch_files(paths, sink),
            #[cfg(target_os = "macos")]
            Backend::FsEvents(b) => b.watch_files(paths, sink),
            Backend::Poll(b) => b.watch_files(paths, sink),
        }
    }

    pub fn watch_recursively(&self, root: PathBuf, sink: EventSink) -> Result<CancelHandle> {
        match self {
            #[cfg(target_os = "linux")]
            Backend::Inotify(b) => b.watch_recursively(root, sink),
            #[cfg(target_os = "macos")]
            Backend::FsEvents(b) => b.watch_recursively(root, sink),
            Backend::Poll(b) => b.watch_recursively(root, sink),
        }
    }
}

/// Stat every path and keep the non-directories
///
/// Flat watches cover plain files only; a directory in the list is
/// skipped, a path that cannot be stat'ed fails the whole setup.
pub(crate) fn plain_files(paths: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let meta = std::fs::metadata(&path).map_err(|e| WatchError::path(&path, e))?;
        if meta.is_dir() {
            tracing::debug!("Skipping directory in flat watch: {}", path.display());
            continue;
        }
        files.push(path);
    }
    Ok(files)
}

/// Fail unless `root` is a directory
pub(crate) fn require_dir(root: &Path) -> Result<()> {
    let meta = std::fs::metadata(root).map_err(|e| WatchError::path(root, e))?;
    if !meta.is_dir() {
        return Err(WatchError::NotADirectory(root.to_path_buf()));
    }
    Ok(())
}
