//! Linux inotify backend
//!
//! One inotify instance per session. The worker blocks in a `mio::Poll`
//! over the inotify descriptor and a `Waker`; cancel fires the waker, the
//! worker exits and drops the instance.

use crate::backend::{plain_files, require_dir};
use crate::session::{
    join_worker, CancelHandle, Delivery, EventSink, Gate, SessionLock, SessionPermit,
};
use fswatch_core::{Event, EventType, Result, WatchError};
use inotify::{Event as Record, EventMask, Inotify, WatchDescriptor, WatchMask};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

const INOTIFY: Token = Token(0);
const WAKE: Token = Token(1);

/// Enough for a few hundred records with names
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Watch mask for a single file in flat mode
fn file_mask() -> WatchMask {
    WatchMask::MASK_ADD
        | WatchMask::MODIFY
        | WatchMask::DELETE_SELF
        | WatchMask::MOVE_SELF
        | WatchMask::ATTRIB
}

/// Watch mask for every directory of a recursive watch
fn dir_mask() -> WatchMask {
    WatchMask::ONLYDIR
        | WatchMask::MASK_ADD
        | WatchMask::MODIFY
        | WatchMask::CREATE
        | WatchMask::DELETE
        | WatchMask::DELETE_SELF
        | WatchMask::MOVE
        | WatchMask::MOVE_SELF
        | WatchMask::ATTRIB
}

/// Map a record mask to an event kind
///
/// Precedence, highest first: delete, create, modify, move-self. A file
/// watched in flat mode that is renamed away shows up as deleted; its new
/// name is not tracked.
fn classify(mask: EventMask) -> EventType {
    if mask.intersects(EventMask::DELETE | EventMask::DELETE_SELF) {
        EventType::Deleted
    } else if mask.contains(EventMask::CREATE) {
        EventType::Created
    } else if mask.contains(EventMask::MODIFY) {
        EventType::Modified
    } else if mask.contains(EventMask::MOVE_SELF) {
        EventType::Deleted
    } else {
        EventType::Other
    }
}

#[derive(Debug)]
struct WatchDir {
    path: PathBuf,
    recursive: bool,
}

/// The session's inotify instance and its `wd -> path` table
struct WatchTable {
    inotify: Inotify,
    watches: HashMap<WatchDescriptor, WatchDir>,
}

impl WatchTable {
    fn new() -> Result<Self> {
        let inotify = Inotify::init().map_err(|e| WatchError::resource("inotify instance", e))?;
        Ok(Self {
            inotify,
            watches: HashMap::new(),
        })
    }

    fn add(&mut self, path: PathBuf, recursive: bool) -> io::Result<()> {
        let mask = if recursive { dir_mask() } else { file_mask() };
        let wd = self.inotify.watches().add(&path, mask)?;
        trace!("{:?} -> {}", wd, path.display());
        self.watches.insert(wd, WatchDir { path, recursive });
        Ok(())
    }

    /// Register every directory under `root`, root included
    fn add_tree(&mut self, root: &Path) -> Result<()> {
        self.add(root.to_path_buf(), true)
            .map_err(|e| WatchError::path(root, e))?;

        for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            if let Err(e) = self.add(entry.into_path(), true) {
                debug!("Could not watch subdirectory: {}", e);
            }
        }
        Ok(())
    }

    /// Register a directory that appeared mid-session
    ///
    /// Entries created before the watch landed never produce records of
    /// their own, so everything already inside is reported as created and
    /// nested directories are registered on the way down.
    fn adopt_dir(&mut self, dir: &Path) -> Vec<Event> {
        if let Err(e) = self.add(dir.to_path_buf(), true) {
            // Gone again, or replaced by a file
            debug!("Could not watch new directory {}: {}", dir.display(), e);
            return Vec::new();
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry under {}: {}", dir.display(), e);
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                if let Err(e) = self.add(entry.path().to_path_buf(), true) {
                    debug!("Could not watch new directory {}: {}", entry.path().display(), e);
                }
            }
            found.push(Event::new(entry.into_path(), EventType::Created));
        }
        found
    }

    fn retire(&mut self, wd: &WatchDescriptor) {
        if self.watches.remove(wd).is_some() {
            // Fails harmlessly when the kernel already dropped the watch
            let _ = self.inotify.watches().remove(wd.clone());
        }
    }

    /// Turn one record into events, growing the tree on new directories
    fn decode(&mut self, record: Record<&OsStr>) -> Vec<Event> {
        if record.mask.contains(EventMask::Q_OVERFLOW) {
            warn!("inotify queue overflowed, events were dropped");
            return Vec::new();
        }
        if record.mask.contains(EventMask::IGNORED) {
            trace!("{:?} released by the kernel", record.wd);
            self.watches.remove(&record.wd);
            return Vec::new();
        }
        let Some(dir) = self.watches.get(&record.wd) else {
            warn!("Dropping record for unknown watch descriptor {:?}", record.wd);
            return Vec::new();
        };

        let recursive = dir.recursive;
        let path = match record.name {
            Some(name) => dir.path.join(name),
            None => dir.path.clone(),
        };
        let kind = classify(record.mask);

        let mut events = vec![Event::new(path.clone(), kind)];
        if recursive && kind == EventType::Created && record.mask.contains(EventMask::ISDIR) {
            events.extend(self.adopt_dir(&path));
        }
        if !recursive && kind == EventType::Deleted {
            // A flat watch follows the inode; once it is reported gone under
            // this name, later events would be misattributed to it
            self.retire(&record.wd);
        }
        events
    }

    /// Read whatever is queued; `None` once the queue is drained
    fn read_batch(&mut self, buf: &mut [u8]) -> io::Result<Option<Vec<Event>>> {
        let records = match self.inotify.read_events(buf) {
            Ok(records) => records,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Some(Vec::new())),
            Err(e) => return Err(e),
        };

        let mut events = Vec::new();
        for record in records {
            trace!("record {:?} mask={:?}", record.wd, record.mask);
            events.extend(self.decode(record));
        }
        Ok(Some(events))
    }
}

/// inotify engine; one session at a time
#[derive(Debug, Default)]
pub struct InotifyBackend {
    lock: SessionLock,
}

impl InotifyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch_files(&self, paths: Vec<PathBuf>, sink: EventSink) -> Result<CancelHandle> {
        let permit = self.lock.try_acquire()?;
        let files = plain_files(paths)?;

        let mut table = WatchTable::new()?;
        for file in files {
            table
                .add(file.clone(), false)
                .map_err(|e| WatchError::path(file, e))?;
        }

        debug!("Watching {} files with inotify", table.watches.len());
        spawn_session(table, sink, permit)
    }

    pub fn watch_recursively(&self, root: PathBuf, sink: EventSink) -> Result<CancelHandle> {
        let permit = self.lock.try_acquire()?;
        require_dir(&root)?;

        let mut table = WatchTable::new()?;
        table.add_tree(&root)?;

        debug!(
            "Watching {} directories under {} with inotify",
            table.watches.len(),
            root.display()
        );
        spawn_session(table, sink, permit)
    }
}

fn spawn_session(table: WatchTable, sink: EventSink, permit: SessionPermit) -> Result<CancelHandle> {
    let poll = Poll::new().map_err(|e| WatchError::resource("event poll", e))?;
    let waker = Waker::new(poll.registry(), WAKE)
        .map_err(|e| WatchError::resource("worker waker", e))?;
    let fd = table.inotify.as_raw_fd();
    poll.registry()
        .register(&mut SourceFd(&fd), INOTIFY, Interest::READABLE)
        .map_err(|e| WatchError::resource("inotify registration", e))?;

    let gate = Gate::new();
    let delivery = Delivery::new(gate.clone(), sink);

    let worker = thread::Builder::new()
        .name("fswatch-inotify".to_string())
        .spawn(move || read_loop(table, delivery, poll))
        .map_err(|e| WatchError::resource("inotify worker", e))?;

    Ok(CancelHandle::new(move || {
        gate.close();
        if let Err(e) = waker.wake() {
            warn!("Failed to wake inotify worker: {}", e);
        }
        join_worker(worker);
        drop(permit);
        debug!("inotify session cancelled");
    }))
}

fn read_loop(mut table: WatchTable, mut delivery: Delivery, mut poll: Poll) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut ready = Events::with_capacity(8);

    'session: loop {
        if let Err(e) = poll.poll(&mut ready, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            debug!("poll on inotify failed: {}", e);
            break;
        }
        if ready.iter().any(|event| event.token() == WAKE) {
            break;
        }

        // Readiness is edge-triggered: drain the queue before polling again
        loop {
            let events = match table.read_batch(&mut buf) {
                Ok(Some(events)) => events,
                Ok(None) => break,
                Err(e) => {
                    debug!("inotify read failed, ending session: {}", e);
                    break 'session;
                }
            };
            if !delivery.deliver(events) {
                break 'session;
            }
        }
    }

    debug!("inotify worker exiting");
}
