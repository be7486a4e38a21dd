//! Common utilities for integration tests

use crossbeam_channel::{unbounded, Receiver};
use fswatch::EventType;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Upper bound for an expected event to show up
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long "nothing else happens" is observed
pub const QUIET_PERIOD: Duration = Duration::from_millis(750);

pub type Observed = (PathBuf, EventType);

/// Receiving end of an observer that records every call
pub struct Recorder {
    rx: Receiver<Observed>,
}

/// An observer that forwards into a [`Recorder`]
pub fn recorder() -> (
    impl FnMut(&Path, EventType) -> anyhow::Result<()> + Send + 'static,
    Recorder,
) {
    let (tx, rx) = unbounded();
    let observer = move |path: &Path, kind: EventType| -> anyhow::Result<()> {
        // The test may already have dropped its recorder
        let _ = tx.send((path.to_path_buf(), kind));
        Ok(())
    };
    (observer, Recorder { rx })
}

impl Recorder {
    /// Next event that is not OTHER, or `None` once `timeout` passes
    pub fn next_event(&self, timeout: Duration) -> Option<Observed> {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.checked_duration_since(Instant::now())?;
            match self.rx.recv_timeout(left) {
                Ok((_, EventType::Other)) => continue,
                Ok(event) => return Some(event),
                Err(_) => return None,
            }
        }
    }

    /// Collect events up to and including `kind` on `path`
    pub fn until(&self, path: &Path, kind: EventType) -> Vec<Observed> {
        let mut seen = Vec::new();
        loop {
            match self.next_event(EVENT_TIMEOUT) {
                Some(event) => {
                    let done = event.0 == path && event.1 == kind;
                    seen.push(event);
                    if done {
                        return seen;
                    }
                }
                None => panic!(
                    "timed out waiting for {} on {}, saw {:?}",
                    kind,
                    path.display(),
                    seen
                ),
            }
        }
    }

    /// Drop whatever was recorded so far
    pub fn discard_pending(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    /// Assert no further (non OTHER) event arrives
    pub fn assert_quiet(&self) {
        if let Some(event) = self.next_event(QUIET_PERIOD) {
            panic!("unexpected event {:?}", event);
        }
    }
}

/// Open, write, flush and close without truncating
pub fn append(path: &Path, text: &str) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.sync_all().unwrap();
}

/// Create an empty file
pub fn touch(path: &Path) {
    std::fs::write(path, b"").unwrap();
}
