//! Polling backend
//!
//! Re-stats every watched file on a fixed interval and diffs the result
//! against the previous snapshot. Works on any host; recursive watching
//! is not supported, callers fall back to [`enumerate_files`] plus a flat
//! watch.
//!
//! [`enumerate_files`]: crate::enumerate_files

use crate::backend::plain_files;
use crate::session::{join_worker, CancelHandle, Delivery, EventSink, Gate, SessionLock};
use crossbeam_channel::{bounded, select, tick, Receiver};
use fswatch_core::hash::hash_file;
use fswatch_core::{Config, ContentHash, Event, EventType, HashAlgorithm, Result, WatchError};
use std::collections::BTreeMap;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};
use tracing::{debug, trace};

/// What one stat (and optional hash) of a path looked like
#[derive(Debug, Clone, PartialEq, Eq)]
struct Snapshot {
    size: u64,
    mtime: Option<SystemTime>,
    perms: u32,
    content: Option<ContentHash>,
}

impl Snapshot {
    fn capture(path: &Path, hash: Option<HashAlgorithm>) -> io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let content = match hash {
            // A file that vanishes between stat and hash is caught next tick
            Some(HashAlgorithm::Blake3) if !meta.is_dir() => hash_file(path).ok(),
            _ => None,
        };

        Ok(Self {
            size: meta.len(),
            mtime: meta.modified().ok(),
            perms: permission_bits(&meta),
            content,
        })
    }
}

#[cfg(unix)]
fn permission_bits(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &Metadata) -> u32 {
    u32::from(meta.permissions().readonly())
}

/// Classify the difference between two snapshots of the same path
fn compare(prev: &Snapshot, next: &Snapshot) -> Option<EventType> {
    if prev.size != next.size || prev.mtime != next.mtime {
        Some(EventType::Modified)
    } else if prev.perms != next.perms {
        Some(EventType::Other)
    } else if prev.content != next.content {
        Some(EventType::Modified)
    } else {
        None
    }
}

/// Tracked state of one polling session
struct PollSession {
    files: BTreeMap<PathBuf, Snapshot>,
    hash: Option<HashAlgorithm>,
}

impl PollSession {
    fn new(paths: Vec<PathBuf>, hash: Option<HashAlgorithm>) -> Result<Self> {
        let mut files = BTreeMap::new();
        for path in paths {
            let snapshot = Snapshot::capture(&path, hash).map_err(|e| WatchError::path(&path, e))?;
            files.insert(path, snapshot);
        }
        Ok(Self { files, hash })
    }

    /// Re-stat every tracked path and return this tick's changes
    fn tick(&mut self) -> Vec<Event> {
        let hash = self.hash;
        let mut events = Vec::new();

        self.files.retain(|path, prev| match Snapshot::capture(path, hash) {
            Ok(next) => {
                if let Some(kind) = compare(prev, &next) {
                    trace!("{} {}", kind, path.display());
                    events.push(Event::new(path.clone(), kind));
                }
                *prev = next;
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                events.push(Event::new(path.clone(), EventType::Deleted));
                false
            }
            Err(e) => {
                debug!("Stat failed for {}, keeping it: {}", path.display(), e);
                true
            }
        });

        events
    }

    fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Fixed-interval stat poller
#[derive(Debug)]
pub struct PollBackend {
    latency: Duration,
    hash: Option<HashAlgorithm>,
    lock: SessionLock,
}

impl PollBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            latency: config.effective_latency(),
            hash: config.hash,
            lock: SessionLock::new(),
        }
    }

    pub fn watch_files(&self, paths: Vec<PathBuf>, sink: EventSink) -> Result<CancelHandle> {
        let permit = self.lock.try_acquire()?;
        let session = PollSession::new(plain_files(paths)?, self.hash)?;
        debug!(
            "Polling {} files every {:?}",
            session.files.len(),
            self.latency
        );

        let gate = Gate::new();
        let delivery = Delivery::new(gate.clone(), sink);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let latency = self.latency;

        let worker = thread::Builder::new()
            .name("fswatch-poll".to_string())
            .spawn(move || poll_loop(session, delivery, stop_rx, latency))
            .map_err(|e| WatchError::resource("poll worker", e))?;

        Ok(CancelHandle::new(move || {
            gate.close();
            drop(stop_tx);
            join_worker(worker);
            drop(permit);
            debug!("Polling session cancelled");
        }))
    }

    pub fn watch_recursively(&self, _root: PathBuf, _sink: EventSink) -> Result<CancelHandle> {
        Err(WatchError::RecursiveUnsupported("poll"))
    }
}

fn poll_loop(mut session: PollSession, mut delivery: Delivery, stop: Receiver<()>, every: Duration) {
    let ticker = tick(every);
    loop {
        select! {
            recv(stop) -> _ => break,
            recv(ticker) -> _ => {
                let events = session.tick();
                if !delivery.deliver(events) {
                    break;
                }
                if session.is_empty() {
                    debug!("All polled files are gone, stopping");
                    break;
                }
            }
        }
    }
}
