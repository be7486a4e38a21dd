//! Print file system events as they arrive

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use fswatch::{CancelHandle, Event, EventType, Watcher};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub fn run(
    new_watcher: impl Fn() -> Result<Watcher>,
    paths: &[PathBuf],
    json: bool,
    duration: Option<Duration>,
) -> Result<()> {
    let (tx, rx) = unbounded();
    let mut files = Vec::new();
    let mut sessions: Vec<(Watcher, CancelHandle)> = Vec::new();

    for path in paths {
        let meta = std::fs::metadata(path)
            .with_context(|| format!("Cannot watch {}", path.display()))?;
        if !meta.is_dir() {
            files.push(path.clone());
            continue;
        }

        // One instance per tree: an instance hosts a single session
        let watcher = new_watcher()?;
        match watcher.watch_recursively(path, forward(tx.clone())) {
            Ok(handle) => {
                info!("Watching {} recursively ({})", path.display(), watcher.kind());
                sessions.push((watcher, handle));
            }
            Err(e) if e.is_recursive_unsupported() => {
                let found = fswatch::enumerate_files(path, true)?;
                info!(
                    "{} cannot watch trees, watching {} files under {}",
                    watcher.kind(),
                    found.len(),
                    path.display()
                );
                files.extend(found);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Cannot watch {}", path.display()));
            }
        }
    }

    if !files.is_empty() {
        let watcher = new_watcher()?;
        let handle = watcher
            .watch_files(&files, forward(tx.clone()))
            .context("Cannot watch files")?;
        info!("Watching {} files ({})", files.len(), watcher.kind());
        sessions.push((watcher, handle));
    }
    drop(tx);

    print_events(&rx, json, duration)?;

    for (_, handle) in &sessions {
        handle.cancel();
    }
    Ok(())
}

/// Observer that hands events to the printing thread
fn forward(tx: Sender<Event>) -> impl FnMut(&Path, EventType) -> Result<()> + Send + 'static {
    move |path: &Path, kind: EventType| -> Result<()> {
        tx.send(Event::new(path, kind)).context("Printer went away")?;
        Ok(())
    }
}

fn print_events(rx: &Receiver<Event>, json: bool, duration: Option<Duration>) -> Result<()> {
    let deadline = duration.map(|d| Instant::now() + d);

    loop {
        let event = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(left) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => return Ok(()),
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(event) => event,
                Err(_) => break,
            },
        };

        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            println!("{} {}", colored_kind(event.kind), event.path.display());
        }
    }

    warn!("All watch sessions ended");
    Ok(())
}

fn colored_kind(kind: EventType) -> String {
    let label = format!("{:<8}", kind.as_str());
    match kind {
        EventType::Created => label.green().to_string(),
        EventType::Deleted => label.red().to_string(),
        EventType::Modified => label.yellow().to_string(),
        _ => label.dimmed().to_string(),
    }
}
