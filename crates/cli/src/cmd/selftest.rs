//! Self-test: drive real files and check what the watcher reports
//!
//! Each step performs one file operation and waits for the event it
//! should produce. OTHER events are ignored throughout.

use anyhow::{bail, Context, Result};
use crossbeam_channel::{unbounded, Receiver};
use fswatch::{CancelHandle, EventType, Watcher};
use owo_colors::OwoColorize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// How long to listen for stray events after the last step
const SETTLE: Duration = Duration::from_secs(1);

pub fn run(new_watcher: impl Fn() -> Result<Watcher>, timeout: Duration) -> Result<()> {
    let dir = tempfile::tempdir().context("Failed to create scratch directory")?;

    let watcher = new_watcher()?;
    println!("{} {}", "Engine:".bold(), watcher.kind().cyan());

    single_file(&watcher, dir.path(), timeout).context("Single file scenario failed")?;
    println!("  {} single file", "✓".green());

    let watcher = new_watcher()?;
    two_files(&watcher, dir.path(), timeout).context("Two file scenario failed")?;
    println!("  {} two files with rename", "✓".green());

    println!("{}", "All scenarios passed".green().bold());
    Ok(())
}

/// Collects observer calls for a fixed set of watched paths
struct Monitor {
    rx: Receiver<(PathBuf, EventType)>,
    watched: Vec<PathBuf>,
    timeout: Duration,
}

impl Monitor {
    fn start(
        watcher: &Watcher,
        watched: Vec<PathBuf>,
        timeout: Duration,
    ) -> Result<(Self, CancelHandle)> {
        let (tx, rx) = unbounded();
        let handle = watcher
            .watch_files(&watched, move |path: &Path, kind: EventType| {
                tx.send((path.to_path_buf(), kind))?;
                Ok(())
            })
            .context("Failed to start watching")?;
        Ok((
            Self {
                rx,
                watched,
                timeout,
            },
            handle,
        ))
    }

    fn check_path(&self, path: &Path) -> Result<()> {
        if !self.watched.iter().any(|w| w == path) {
            bail!("event for unwatched path {}", path.display());
        }
        Ok(())
    }

    /// Wait for `kind` on `path`, skipping events of other kinds
    fn expect(&self, path: &Path, kind: EventType) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let (got_path, got_kind) = self
                .rx
                .recv_timeout(left)
                .with_context(|| format!("no {} event for {}", kind, path.display()))?;
            if got_kind == EventType::Other {
                continue;
            }
            self.check_path(&got_path)?;
            debug!("{} {}", got_kind, got_path.display());
            if got_path == path && got_kind == kind {
                return Ok(());
            }
        }
    }

    /// Fail on anything but OTHER arriving once the scenario is over
    fn settle(&self) -> Result<()> {
        let deadline = Instant::now() + SETTLE;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(left) {
                Ok((_, EventType::Other)) => continue,
                Ok((path, kind)) => bail!("unexpected {} event for {}", kind, path.display()),
                Err(_) => return Ok(()),
            }
        }
    }
}

fn single_file(watcher: &Watcher, dir: &Path, timeout: Duration) -> Result<()> {
    let file = dir.join("single.txt");
    create_empty(&file)?;

    let (monitor, handle) = Monitor::start(watcher, vec![file.clone()], timeout)?;

    write_at_start(&file, "Hello, World!\n")?;
    monitor.expect(&file, EventType::Modified)?;

    write_at_start(&file, "Goodbye, World!\n")?;
    monitor.expect(&file, EventType::Modified)?;

    std::fs::remove_file(&file)?;
    monitor.expect(&file, EventType::Deleted)?;

    // A new file at the same path is not the one being watched
    create_empty(&file)?;
    std::fs::remove_file(&file)?;
    monitor.settle()?;

    handle.cancel();
    Ok(())
}

fn two_files(watcher: &Watcher, dir: &Path, timeout: Duration) -> Result<()> {
    let first = dir.join("first.txt");
    let second = dir.join("second.txt");
    let renamed = dir.join("third.txt");
    create_empty(&first)?;
    create_empty(&second)?;

    let (monitor, handle) = Monitor::start(watcher, vec![first.clone(), second.clone()], timeout)?;

    write_at_start(&first, "Hello, World!\n")?;
    monitor.expect(&first, EventType::Modified)?;

    write_at_start(&second, "Goodbye, World!\n")?;
    monitor.expect(&second, EventType::Modified)?;

    std::fs::remove_file(&first)?;
    monitor.expect(&first, EventType::Deleted)?;

    std::fs::rename(&second, &renamed)?;
    monitor.expect(&second, EventType::Deleted)?;

    std::fs::remove_file(&renamed)?;
    monitor.settle()?;

    handle.cancel();
    Ok(())
}

fn create_empty(path: &Path) -> Result<()> {
    std::fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(())
}

/// Open read-write, overwrite from offset 0, sync and close
fn write_at_start(path: &Path, text: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.write_all(text.as_bytes())?;
    file.sync_all()?;
    Ok(())
}
