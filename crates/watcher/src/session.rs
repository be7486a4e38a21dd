//! Watch session lifecycle
//!
//! A session is the span between a successful `watch_*` call and its
//! cancellation. Three pieces cooperate:
//!
//! - [`SessionLock`] makes a backend instance host at most one session.
//!   The [`SessionPermit`] it hands out is held until cancel.
//! - [`Delivery`] is owned by the session's worker and is the only path
//!   from decoded events to the observer. Its gate closes on cancel or on
//!   the first observer failure.
//! - [`CancelHandle`] is returned to the caller and tears everything down.

use fswatch_core::{Event, Result, WatchError};
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Batch consumer handed to a backend by the normalizer
pub(crate) type EventSink = Box<dyn FnMut(Vec<Event>) -> anyhow::Result<()> + Send>;

/// Single-session guard of one backend instance
#[derive(Debug, Default)]
pub(crate) struct SessionLock {
    busy: Arc<AtomicBool>,
}

impl SessionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the instance, or fail if a session is already running
    pub fn try_acquire(&self) -> Result<SessionPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| WatchError::SessionActive)?;

        Ok(SessionPermit {
            busy: Arc::clone(&self.busy),
        })
    }

    #[cfg(test)]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof of a claimed instance; releases the claim on drop
#[derive(Debug)]
pub(crate) struct SessionPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Open/closed switch shared between a worker and its cancel handle
///
/// Reentrant so an observer may cancel its own session from inside a
/// delivery without deadlocking.
#[derive(Clone)]
pub(crate) struct Gate {
    open: Arc<ReentrantMutex<Cell<bool>>>,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            open: Arc::new(ReentrantMutex::new(Cell::new(true))),
        }
    }

    /// Close the gate. Waits for an in-flight delivery on another thread.
    pub fn close(&self) {
        self.open.lock().set(false);
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.open.lock().get()
    }
}

/// Worker-side end of a session
pub(crate) struct Delivery {
    gate: Gate,
    sink: EventSink,
}

impl Delivery {
    pub fn new(gate: Gate, sink: EventSink) -> Self {
        Self { gate, sink }
    }

    /// Hand a batch to the observer.
    ///
    /// Returns `false` once the session must stop: the gate was closed by
    /// cancel, or the observer failed (which closes the gate for good).
    pub fn deliver(&mut self, events: Vec<Event>) -> bool {
        let open = self.gate.open.lock();
        if !open.get() {
            return false;
        }
        if events.is_empty() {
            return true;
        }

        if let Err(e) = (self.sink)(events) {
            debug!("Observer failed, unsubscribing: {:#}", e);
            open.set(false);
            return false;
        }

        // The observer may have cancelled its own session
        open.get()
    }
}

/// Handle that ends a watch session
///
/// `cancel` is idempotent and safe to call from any thread, including
/// from inside the observer. Once the first call returns, no new observer
/// invocation starts; a call racing with it returns immediately. Dropping
/// the handle cancels the session.
pub struct CancelHandle {
    teardown: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl CancelHandle {
    pub(crate) fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    /// Release native resources and the watcher instance
    pub fn cancel(&self) {
        // Contended means another thread is tearing down, possibly while
        // waiting on the very delivery that is calling us.
        let Some(mut teardown) = self.teardown.try_lock() else {
            return;
        };
        if let Some(teardown) = teardown.take() {
            teardown();
        }
    }

    /// True once cancel has started; never blocks
    pub fn is_cancelled(&self) -> bool {
        // Contended means a teardown is running right now
        self.teardown.try_lock().map_or(true, |teardown| teardown.is_none())
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Join a session worker unless we are that worker
pub(crate) fn join_worker(handle: JoinHandle<()>) {
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        warn!("Watch worker panicked");
    }
}
