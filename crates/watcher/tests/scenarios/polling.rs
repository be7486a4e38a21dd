//! Polling engine scenarios

use crate::common::{append, recorder, touch, EVENT_TIMEOUT};
use filetime::FileTime;
use fswatch::{BackendKind, Config, EventType, HashAlgorithm, Watcher};
use std::path::Path;
use std::time::Duration;

fn poller(config: Config) -> Watcher {
    let watcher = Watcher::polling(config.with_latency(Duration::from_millis(50)));
    assert_eq!(watcher.kind(), BackendKind::Poll);
    watcher
}

#[test]
fn test_modification_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("grow.txt");
    touch(&file);

    let watcher = poller(Config::default());
    let (observer, events) = recorder();
    let _handle = watcher.watch_file(&file, observer).unwrap();

    append(&file, "more bytes\n");
    let (path, kind) = events.next_event(EVENT_TIMEOUT).unwrap();
    assert_eq!(path, file);
    assert_eq!(kind, EventType::Modified);
}

#[test]
fn test_delete_reported_once() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("gone.txt");
    touch(&file);

    let watcher = poller(Config::default());
    let (observer, events) = recorder();
    let _handle = watcher.watch_file(&file, observer).unwrap();

    std::fs::remove_file(&file).unwrap();
    events.until(&file, EventType::Deleted);

    // Not tracked any more, even when the path comes back
    std::fs::write(&file, b"recreated with new content").unwrap();
    events.assert_quiet();
}

#[test]
fn test_recursive_is_a_distinct_error() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = poller(Config::default());

    let err = watcher
        .watch_recursively(dir.path(), |_: &Path, _: EventType| Ok(()))
        .unwrap_err();
    assert!(err.is_recursive_unsupported());
}

#[test]
fn test_directories_are_dropped_from_flat_watch() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("only.txt");
    touch(&file);

    let watcher = poller(Config::default());
    let (observer, events) = recorder();
    let _handle = watcher
        .watch_files([dir.path(), file.as_path()], observer)
        .unwrap();

    touch(&dir.path().join("sibling.txt"));
    events.assert_quiet();

    append(&file, "x");
    events.until(&file, EventType::Modified);
}

#[test]
fn test_content_hash_catches_same_size_rewrite() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("hashed.txt");
    std::fs::write(&file, b"aaaa").unwrap();
    let pinned = FileTime::from_unix_time(1_700_000_000, 0);
    filetime::set_file_mtime(&file, pinned).unwrap();

    let watcher = poller(Config::default().with_hash(HashAlgorithm::Blake3));
    let (observer, events) = recorder();
    let _handle = watcher.watch_file(&file, observer).unwrap();

    std::fs::write(&file, b"bbbb").unwrap();
    filetime::set_file_mtime(&file, pinned).unwrap();

    events.until(&file, EventType::Modified);
}

#[cfg(unix)]
#[test]
fn test_permission_change_is_other() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("mode.txt");
    touch(&file);
    std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o644)).unwrap();

    let watcher = poller(Config::default());
    let (tx, rx) = crossbeam_channel::unbounded();
    let _handle = watcher
        .watch_file(&file, move |_: &Path, kind: EventType| {
            let _ = tx.send(kind);
            Ok(())
        })
        .unwrap();

    std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o600)).unwrap();
    assert_eq!(rx.recv_timeout(EVENT_TIMEOUT).unwrap(), EventType::Other);
}
