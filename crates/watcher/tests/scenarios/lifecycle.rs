//! Session lifecycle: guard, cancel and observer failure

use crate::common::{append, recorder, touch, EVENT_TIMEOUT, QUIET_PERIOD};
use fswatch::{CancelHandle, Config, EventType, WatchError, Watcher};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn poller() -> Watcher {
    Watcher::polling(Config::default().with_latency(Duration::from_millis(50)))
}

#[test]
fn test_second_session_rejected_until_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("busy.txt");
    touch(&file);

    let watcher = poller();
    let first = watcher
        .watch_file(&file, |_: &Path, _: EventType| Ok(()))
        .unwrap();

    let second = watcher.watch_file(&file, |_: &Path, _: EventType| Ok(()));
    assert!(matches!(second, Err(WatchError::SessionActive)));

    first.cancel();
    let third = watcher.watch_file(&file, |_: &Path, _: EventType| Ok(()));
    assert!(third.is_ok());
}

#[test]
fn test_setup_failure_leaves_instance_usable() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("ok.txt");
    touch(&file);

    let watcher = poller();
    let err = watcher
        .watch_files([file.clone(), dir.path().join("missing.txt")], |_: &Path, _: EventType| {
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, WatchError::Path { .. }));

    assert!(watcher
        .watch_file(&file, |_: &Path, _: EventType| Ok(()))
        .is_ok());
}

#[test]
fn test_failing_observer_is_called_once() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("fail.txt");
    touch(&file);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let watcher = poller();
    let _handle = watcher
        .watch_file(&file, move |_: &Path, _: EventType| {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("not interested any more")
        })
        .unwrap();

    for i in 0..5 {
        append(&file, &format!("write {}\n", i));
        thread::sleep(Duration::from_millis(100));
    }
    thread::sleep(QUIET_PERIOD);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cancel_from_inside_observer() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("self.txt");
    touch(&file);

    let slot: Arc<Mutex<Option<CancelHandle>>> = Arc::new(Mutex::new(None));
    let calls = Arc::new(AtomicUsize::new(0));
    let (observer_slot, counter) = (slot.clone(), calls.clone());

    let watcher = poller();
    let handle = watcher
        .watch_file(&file, move |_: &Path, _: EventType| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(handle) = observer_slot.lock().as_ref() {
                handle.cancel();
            }
            Ok(())
        })
        .unwrap();
    *slot.lock() = Some(handle);

    for i in 0..5 {
        append(&file, &format!("write {}\n", i));
        thread::sleep(Duration::from_millis(100));
    }
    thread::sleep(QUIET_PERIOD);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The instance was released by the observer's cancel
    assert!(watcher
        .watch_file(&file, |_: &Path, _: EventType| Ok(()))
        .is_ok());
}

#[test]
fn test_dropping_handle_cancels() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("drop.txt");
    touch(&file);

    let watcher = poller();
    let (observer, events) = recorder();
    drop(watcher.watch_file(&file, observer).unwrap());

    append(&file, "after drop\n");
    events.assert_quiet();
}

#[test]
fn test_default_watcher_free_functions() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("default.txt");
    touch(&file);

    let (observer, events) = recorder();
    let handle = fswatch::watch_file(&file, observer).unwrap();
    assert_eq!(fswatch::default_watcher().kind(), Watcher::default().kind());

    append(&file, "hello\n");
    let (path, kind) = events.next_event(EVENT_TIMEOUT).unwrap();
    assert_eq!(path, file);
    assert_eq!(kind, EventType::Modified);
    handle.cancel();
}
