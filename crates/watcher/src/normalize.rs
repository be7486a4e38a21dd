//! Path canonicalization and observer adaptation
//!
//! Backends register and report canonical paths (absolute, symlinks
//! resolved). Callers get events back in the spelling they used: an exact
//! reverse map for flat watches, prefix substitution for recursive ones
//! since the set of descendants is unbounded.

use crate::session::EventSink;
use fswatch_core::{Event, EventType, Result, WatchError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Resolve symlinks and make `path` absolute
pub(crate) fn canonicalize(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).map_err(|e| WatchError::path(path, e))
}

/// Rewrites canonical event paths into the caller's spelling
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PathRemap {
    /// Caller already used canonical paths
    Identity,
    /// Flat watch: canonical path -> caller path
    Exact(HashMap<PathBuf, PathBuf>),
    /// Recursive watch: swap the canonical root for the caller's root
    Prefix { caller: PathBuf, canonical: PathBuf },
}

impl PathRemap {
    /// Canonicalize flat-watch inputs, remembering every changed spelling
    pub fn for_files(paths: &[PathBuf]) -> Result<(Vec<PathBuf>, Self)> {
        let mut canonical = Vec::with_capacity(paths.len());
        let mut remap = HashMap::new();

        for path in paths {
            let resolved = canonicalize(path)?;
            if &resolved != path {
                remap.insert(resolved.clone(), path.clone());
            }
            canonical.push(resolved);
        }

        let remap = if remap.is_empty() {
            PathRemap::Identity
        } else {
            PathRemap::Exact(remap)
        };
        Ok((canonical, remap))
    }

    /// Canonicalize a recursive-watch root
    pub fn for_tree(path: &Path) -> Result<(PathBuf, Self)> {
        let resolved = canonicalize(path)?;
        let remap = if resolved == path {
            PathRemap::Identity
        } else {
            PathRemap::Prefix {
                caller: path.to_path_buf(),
                canonical: resolved.clone(),
            }
        };
        Ok((resolved, remap))
    }

    pub fn rewrite(&self, path: PathBuf) -> PathBuf {
        match self {
            PathRemap::Identity => path,
            PathRemap::Exact(map) => map.get(&path).cloned().unwrap_or(path),
            PathRemap::Prefix { caller, canonical } => match path.strip_prefix(canonical) {
                Ok(rest) if rest.as_os_str().is_empty() => caller.clone(),
                Ok(rest) => caller.join(rest),
                Err(_) => path,
            },
        }
    }
}

/// Bridges backend batches to a per-event caller observer
///
/// Events are forwarded in batch order. The first observer error stops
/// the batch and is returned, which closes the session's delivery gate:
/// the backend never calls this adapter again.
pub(crate) struct ObserverAdapter<F> {
    observer: F,
    remap: PathRemap,
}

impl<F> ObserverAdapter<F>
where
    F: FnMut(&Path, EventType) -> anyhow::Result<()> + Send + 'static,
{
    pub fn new(observer: F, remap: PathRemap) -> Self {
        Self { observer, remap }
    }

    pub fn into_sink(mut self) -> EventSink {
        Box::new(move |events| self.dispatch(events))
    }

    fn dispatch(&mut self, events: Vec<Event>) -> anyhow::Result<()> {
        for event in events {
            if !event.kind.is_deliverable() {
                continue;
            }
            let path = self.remap.rewrite(event.path);
            (self.observer)(&path, event.kind)?;
        }
        Ok(())
    }
}
