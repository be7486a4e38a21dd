//! macOS FSEvents backend
//!
//! FSEvents hands batches to a C callback on a run-loop thread. The
//! callback only knows the session id it was created with; a process-wide
//! registry maps that id to the session's delivery channel, so a callback
//! that races a cancelled session finds nothing and drops its batch.
//!
//! Threads per session: the run-loop thread that owns the stream, and a
//! consumer that drains the channel into the delivery gate.

#![allow(non_upper_case_globals)]

use crate::backend::{plain_files, require_dir};
use crate::session::{join_worker, CancelHandle, Delivery, EventSink, Gate, SessionLock};
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use fsevent_sys as fse;
use fsevent_sys::core_foundation as cf;
use fswatch_core::{Config, Event, EventType, Result, WatchError};
use parking_lot::{const_mutex, Mutex};
use std::collections::{BTreeMap, HashSet};
use std::ffi::CStr;
use std::io;
use std::os::raw::{c_char, c_void};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Batches in flight between the callback and the consumer
const CHANNEL_CAPACITY: usize = 8;

/// How long the callback waits on a full channel before dropping a batch
const SEND_TIMEOUT: Duration = Duration::from_secs(1);

static REGISTRY: Mutex<BTreeMap<usize, Sender<Vec<Event>>>> = const_mutex(BTreeMap::new());
static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct StreamFlags: u32 {
        const MUST_SCAN_SUBDIRS = fse::kFSEventStreamEventFlagMustScanSubDirs;
        const USER_DROPPED = fse::kFSEventStreamEventFlagUserDropped;
        const KERNEL_DROPPED = fse::kFSEventStreamEventFlagKernelDropped;
        const HISTORY_DONE = fse::kFSEventStreamEventFlagHistoryDone;
        const ROOT_CHANGED = fse::kFSEventStreamEventFlagRootChanged;
        const MOUNT = fse::kFSEventStreamEventFlagMount;
        const UNMOUNT = fse::kFSEventStreamEventFlagUnmount;
        const ITEM_CREATED = fse::kFSEventStreamEventFlagItemCreated;
        const ITEM_REMOVED = fse::kFSEventStreamEventFlagItemRemoved;
        const INODE_META_MOD = fse::kFSEventStreamEventFlagItemInodeMetaMod;
        const ITEM_RENAMED = fse::kFSEventStreamEventFlagItemRenamed;
        const ITEM_MODIFIED = fse::kFSEventStreamEventFlagItemModified;
        const FINDER_INFO_MOD = fse::kFSEventStreamEventFlagItemFinderInfoMod;
        const ITEM_CHANGE_OWNER = fse::kFSEventStreamEventFlagItemChangeOwner;
        const ITEM_XATTR_MOD = fse::kFSEventStreamEventFlagItemXattrMod;
        const IS_FILE = fse::kFSEventStreamEventFlagItemIsFile;
        const IS_DIR = fse::kFSEventStreamEventFlagItemIsDir;
        const IS_SYMLINK = fse::kFSEventStreamEventFlagItemIsSymlink;
    }
}

impl StreamFlags {
    fn is_metadata(self) -> bool {
        self.intersects(
            StreamFlags::ITEM_CHANGE_OWNER
                | StreamFlags::FINDER_INFO_MOD
                | StreamFlags::INODE_META_MOD
                | StreamFlags::ITEM_XATTR_MOD,
        )
    }
}

/// Map one `(path, flags)` pair to an event kind
///
/// A rename or root change is ambiguous, so the path is stat'ed: gone means
/// deleted, present after a rename means it arrived under this name.
fn translate(path: &Path, flags: StreamFlags) -> EventType {
    if flags.contains(StreamFlags::ITEM_MODIFIED) {
        EventType::Modified
    } else if flags.contains(StreamFlags::ITEM_CREATED) {
        EventType::Created
    } else if flags.contains(StreamFlags::ITEM_REMOVED) {
        EventType::Deleted
    } else if flags.intersects(StreamFlags::ROOT_CHANGED | StreamFlags::ITEM_RENAMED) {
        match std::fs::symlink_metadata(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => EventType::Deleted,
            Ok(_) if flags.contains(StreamFlags::ITEM_RENAMED) => EventType::Created,
            _ => EventType::Nothing,
        }
    } else if flags.is_metadata() {
        EventType::Other
    } else {
        warn!("Unhandled FSEvents flags {:?} for {}", flags, path.display());
        EventType::Nothing
    }
}

extern "C" fn stream_callback(
    _stream: fse::FSEventStreamRef,
    info: *mut c_void,
    num_events: usize,
    event_paths: *mut c_void,
    event_flags: *const fse::FSEventStreamEventFlags,
    _event_ids: *const fse::FSEventStreamEventId,
) {
    let id = info as usize;
    let paths = event_paths as *const *const c_char;

    let mut events = Vec::with_capacity(num_events);
    for i in 0..num_events {
        // SAFETY: FSEvents passes `num_events` C strings and flag words
        let (raw_path, raw_flags) =
            unsafe { (CStr::from_ptr(*paths.add(i)), *event_flags.add(i)) };
        let path = match raw_path.to_str() {
            Ok(path) => PathBuf::from(path),
            Err(_) => {
                warn!("Dropping FSEvents record with a non UTF-8 path");
                continue;
            }
        };
        let flags = StreamFlags::from_bits_retain(raw_flags);
        trace!("fsevent {:?} {}", flags, path.display());
        let kind = translate(&path, flags);
        events.push(Event::new(path, kind));
    }

    let Some(tx) = REGISTRY.lock().get(&id).cloned() else {
        debug!("Dropping FSEvents batch for unregistered session {}", id);
        return;
    };
    match tx.send_timeout(events, SEND_TIMEOUT) {
        Ok(()) => {}
        Err(SendTimeoutError::Timeout(_)) => warn!("Session {} is not draining, batch dropped", id),
        Err(SendTimeoutError::Disconnected(_)) => {}
    }
}

/// Raw CoreFoundation pointer moved to or from the run-loop thread
struct SendPtr(*mut c_void);

// SAFETY: the pointee is only used from the thread it is handed to, or via
// the thread-safe CFRunLoopStop/CFRunLoopIsWaiting calls
unsafe impl Send for SendPtr {}

/// A started stream and the thread running its loop
struct RunningStream {
    run_loop: SendPtr,
    stream: SendPtr,
    thread: JoinHandle<()>,
}

impl RunningStream {
    fn start(paths: &[PathBuf], id: usize, latency: Duration) -> Result<Self> {
        let array = unsafe {
            cf::CFArrayCreateMutable(cf::kCFAllocatorDefault, 0, &cf::kCFTypeArrayCallBacks)
        };
        for path in paths {
            let Some(text) = path.to_str() else {
                unsafe { cf::CFRelease(array) };
                return Err(WatchError::path(
                    path,
                    io::Error::new(io::ErrorKind::InvalidInput, "path is not valid UTF-8"),
                ));
            };
            let mut err: cf::CFErrorRef = ptr::null_mut();
            let cf_path = unsafe { cf::str_path_to_cfstring_ref(text, &mut err) };
            if cf_path.is_null() {
                unsafe {
                    if !err.is_null() {
                        cf::CFRelease(err as cf::CFRef);
                    }
                    cf::CFRelease(array);
                }
                return Err(WatchError::path(path, io::Error::from(io::ErrorKind::NotFound)));
            }
            unsafe {
                cf::CFArrayAppendValue(array, cf_path);
                cf::CFRelease(cf_path);
            }
        }

        let context = fse::FSEventStreamContext {
            version: 0,
            info: id as *mut c_void,
            retain: None,
            release: None,
            copy_description: None,
        };
        let stream = unsafe {
            fse::FSEventStreamCreate(
                cf::kCFAllocatorDefault,
                stream_callback,
                &context,
                array,
                fse::kFSEventStreamEventIdSinceNow,
                latency.as_secs_f64(),
                fse::kFSEventStreamCreateFlagFileEvents | fse::kFSEventStreamCreateFlagWatchRoot,
            )
        };
        unsafe { cf::CFRelease(array) };
        if stream.is_null() {
            return Err(WatchError::resource(
                "FSEvents stream",
                io::Error::new(io::ErrorKind::Other, "FSEventStreamCreate returned null"),
            ));
        }

        let (loop_tx, loop_rx) = bounded::<Option<SendPtr>>(1);
        let owned = SendPtr(stream as *mut c_void);
        let thread = thread::Builder::new()
            .name("fswatch-fsevents".to_string())
            .spawn(move || run_stream(owned, loop_tx))
            .map_err(|e| {
                unsafe { fse::FSEventStreamRelease(stream) };
                WatchError::resource("FSEvents run loop", e)
            })?;

        match loop_rx.recv() {
            Ok(Some(run_loop)) => Ok(Self {
                run_loop,
                stream: SendPtr(stream as *mut c_void),
                thread,
            }),
            _ => {
                join_worker(thread);
                Err(WatchError::resource(
                    "FSEvents stream",
                    io::Error::new(io::ErrorKind::Other, "FSEventStreamStart failed"),
                ))
            }
        }
    }

    /// Flush pending events, stop the loop and wait for its thread
    ///
    /// The flush is skipped when running on the consumer: it would wait for
    /// a callback that is blocked on this very consumer.
    fn stop(self, flush: bool) {
        unsafe {
            if flush {
                fse::FSEventStreamFlushSync(self.stream.0 as fse::FSEventStreamRef);
            }
            while cf::CFRunLoopIsWaiting(self.run_loop.0) == 0 && !self.thread.is_finished() {
                thread::yield_now();
            }
            cf::CFRunLoopStop(self.run_loop.0);
        }
        join_worker(self.thread);
    }
}

fn run_stream(stream: SendPtr, started: Sender<Option<SendPtr>>) {
    let stream = stream.0 as fse::FSEventStreamRef;
    unsafe {
        let run_loop = cf::CFRunLoopGetCurrent();
        fse::FSEventStreamScheduleWithRunLoop(stream, run_loop, cf::kCFRunLoopDefaultMode);
        if fse::FSEventStreamStart(stream) == 0 {
            fse::FSEventStreamInvalidate(stream);
            fse::FSEventStreamRelease(stream);
            let _ = started.send(None);
            return;
        }
        if started.send(Some(SendPtr(run_loop))).is_err() {
            return;
        }

        // Returns once CFRunLoopStop is called from cancel
        cf::CFRunLoopRun();

        fse::FSEventStreamStop(stream);
        fse::FSEventStreamInvalidate(stream);
        fse::FSEventStreamRelease(stream);
    }
    debug!("FSEvents run loop exited");
}

fn consume(rx: Receiver<Vec<Event>>, mut delivery: Delivery, flat: bool) {
    let mut gone = HashSet::new();
    for mut batch in rx {
        if flat {
            drop_retired(&mut batch, &mut gone);
        }
        if !delivery.deliver(batch) {
            break;
        }
    }
}

/// Flat sessions forget a file once it is reported deleted
///
/// FSEvents watches names, so a file later created at the same path would
/// otherwise be reported as if it were the original.
fn drop_retired(batch: &mut Vec<Event>, gone: &mut HashSet<PathBuf>) {
    batch.retain(|event| {
        if gone.contains(&event.path) {
            trace!("Dropping event for retired {}", event.path.display());
            return false;
        }
        if event.kind == EventType::Deleted {
            gone.insert(event.path.clone());
        }
        true
    });
}

/// FSEvents engine; one session at a time
#[derive(Debug)]
pub struct FsEventsBackend {
    latency: Duration,
    lock: SessionLock,
}

impl FsEventsBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            latency: config.effective_latency(),
            lock: SessionLock::new(),
        }
    }

    pub fn watch_files(&self, paths: Vec<PathBuf>, sink: EventSink) -> Result<CancelHandle> {
        let files = plain_files(paths)?;
        self.start(files, sink, true)
    }

    pub fn watch_recursively(&self, root: PathBuf, sink: EventSink) -> Result<CancelHandle> {
        require_dir(&root)?;
        self.start(vec![root], sink, false)
    }

    fn start(&self, paths: Vec<PathBuf>, sink: EventSink, flat: bool) -> Result<CancelHandle> {
        let permit = self.lock.try_acquire()?;

        // FSEvents rejects an empty path array; nothing to watch is a quiet session
        if paths.is_empty() {
            return Ok(CancelHandle::new(move || drop(permit)));
        }

        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = bounded(CHANNEL_CAPACITY);
        REGISTRY.lock().insert(id, tx);

        let stream = match RunningStream::start(&paths, id, self.latency) {
            Ok(stream) => stream,
            Err(e) => {
                REGISTRY.lock().remove(&id);
                return Err(e);
            }
        };

        let gate = Gate::new();
        let delivery = Delivery::new(gate.clone(), sink);
        let consumer = match thread::Builder::new()
            .name("fswatch-fsevents-consumer".to_string())
            .spawn(move || consume(rx, delivery, flat))
        {
            Ok(consumer) => consumer,
            Err(e) => {
                stream.stop(false);
                REGISTRY.lock().remove(&id);
                return Err(WatchError::resource("FSEvents consumer", e));
            }
        };

        debug!("FSEvents session {} watching {} paths", id, paths.len());

        Ok(CancelHandle::new(move || {
            let on_consumer = consumer.thread().id() == thread::current().id();
            gate.close();
            stream.stop(!on_consumer);
            // Dropping the sender ends the consumer's receive loop
            REGISTRY.lock().remove(&id);
            join_worker(consumer);
            drop(permit);
            debug!("FSEvents session {} cancelled", id);
        }))
    }
}
