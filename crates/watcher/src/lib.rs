//! Cross-platform file system watching
//!
//! This crate provides one watch interface over three engines:
//! - inotify on Linux
//! - FSEvents on macOS
//! - stat polling everywhere else (and on request)
//!
//! Paths are canonicalized before they reach an engine and rewritten back
//! to the caller's spelling before they reach the observer.
//!
//! ```no_run
//! use fswatch::EventType;
//! use std::path::Path;
//!
//! let handle = fswatch::watch_file("Cargo.toml", |path: &Path, kind: EventType| {
//!     println!("{kind} {}", path.display());
//!     Ok(())
//! })?;
//! // ...
//! handle.cancel();
//! # Ok::<(), fswatch::WatchError>(())
//! ```

mod backend;
mod normalize;
mod platform;
mod poll;
mod session;

pub use backend::BackendKind;
pub use fswatch_core::{Config, Event, EventType, HashAlgorithm, Result, WatchError};
pub use session::CancelHandle;

use backend::Backend;
use normalize::{ObserverAdapter, PathRemap};
use poll::PollBackend;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;
use walkdir::WalkDir;

/// A watcher instance bound to one engine
///
/// An instance hosts one session at a time; starting a second one before
/// cancelling the first fails with [`WatchError::SessionActive`]. Build
/// more instances to watch independent sets concurrently.
pub struct Watcher {
    backend: Backend,
}

impl Watcher {
    /// The host's native engine
    pub fn new(config: Config) -> Self {
        let backend = platform::native(&config);
        debug!("Created {} watcher", backend.kind());
        Self { backend }
    }

    /// The polling engine, regardless of host
    pub fn polling(config: Config) -> Self {
        Self {
            backend: Backend::Poll(PollBackend::new(&config)),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn watch_file<F>(&self, path: impl AsRef<Path>, observer: F) -> Result<CancelHandle>
    where
        F: FnMut(&Path, EventType) -> anyhow::Result<()> + Send + 'static,
    {
        self.watch_files([path], observer)
    }

    /// Watch a set of files. Directories in the set are ignored.
    pub fn watch_files<I, P, F>(&self, paths: I, observer: F) -> Result<CancelHandle>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
        F: FnMut(&Path, EventType) -> anyhow::Result<()> + Send + 'static,
    {
        let paths: Vec<PathBuf> = paths.into_iter().map(|p| p.as_ref().to_path_buf()).collect();
        let (canonical, remap) = PathRemap::for_files(&paths)?;
        let sink = ObserverAdapter::new(observer, remap).into_sink();
        self.backend.watch_files(canonical, sink)
    }

    /// Watch a directory and everything below it
    ///
    /// Fails with [`WatchError::RecursiveUnsupported`] on engines that
    /// cannot; use [`enumerate_files`] and [`Watcher::watch_files`] then.
    pub fn watch_recursively<F>(&self, path: impl AsRef<Path>, observer: F) -> Result<CancelHandle>
    where
        F: FnMut(&Path, EventType) -> anyhow::Result<()> + Send + 'static,
    {
        let (canonical, remap) = PathRemap::for_tree(path.as_ref())?;
        let sink = ObserverAdapter::new(observer, remap).into_sink();
        self.backend.watch_recursively(canonical, sink)
    }
}

impl Default for Watcher {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher").field("kind", &self.kind()).finish()
    }
}

static DEFAULT_WATCHER: OnceLock<Watcher> = OnceLock::new();

/// Process-wide watcher behind the free functions, created on first use
pub fn default_watcher() -> &'static Watcher {
    DEFAULT_WATCHER.get_or_init(Watcher::default)
}

/// Watch one file with the default watcher
pub fn watch_file<F>(path: impl AsRef<Path>, observer: F) -> Result<CancelHandle>
where
    F: FnMut(&Path, EventType) -> anyhow::Result<()> + Send + 'static,
{
    default_watcher().watch_file(path, observer)
}

/// Watch a set of files with the default watcher
pub fn watch_files<I, P, F>(paths: I, observer: F) -> Result<CancelHandle>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
    F: FnMut(&Path, EventType) -> anyhow::Result<()> + Send + 'static,
{
    default_watcher().watch_files(paths, observer)
}

/// Watch a directory tree with the default watcher
pub fn watch_recursively<F>(path: impl AsRef<Path>, observer: F) -> Result<CancelHandle>
where
    F: FnMut(&Path, EventType) -> anyhow::Result<()> + Send + 'static,
{
    default_watcher().watch_recursively(path, observer)
}

/// List the files under `dir`, optionally descending into subdirectories
///
/// Symlinks are not followed. Returned paths keep the spelling of `dir`.
pub fn enumerate_files(dir: impl AsRef<Path>, recursive: bool) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    backend::require_dir(dir)?;

    let mut walker = WalkDir::new(dir).min_depth(1).follow_links(false);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry under {}: {}", dir.display(), e);
                continue;
            }
        };
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}
