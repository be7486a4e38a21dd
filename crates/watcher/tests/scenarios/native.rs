//! inotify scenarios

use crate::common::{append, recorder, touch, EVENT_TIMEOUT};
use fswatch::{BackendKind, EventType, Watcher};
use std::path::PathBuf;

fn native() -> Watcher {
    let watcher = Watcher::default();
    assert_eq!(watcher.kind(), BackendKind::Inotify);
    watcher
}

/// Canonical scratch directory, so paths match without any remapping
fn scratch() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = std::fs::canonicalize(dir.path()).unwrap();
    (dir, root)
}

#[test]
fn test_single_file_sequence() {
    let (_dir, root) = scratch();
    let file = root.join("single.txt");
    touch(&file);

    let watcher = native();
    let (observer, events) = recorder();
    let _handle = watcher.watch_file(&file, observer).unwrap();

    append(&file, "Hello, World!\n");
    append(&file, "Goodbye, World!\n");
    std::fs::remove_file(&file).unwrap();

    let seen = events.until(&file, EventType::Deleted);
    let kinds: Vec<EventType> = seen.iter().map(|(_, kind)| *kind).collect();
    assert!(seen.iter().all(|(path, _)| path == &file));
    assert!(
        kinds.iter().filter(|k| **k == EventType::Modified).count() >= 2,
        "{:?}",
        kinds
    );
    assert_eq!(kinds.last(), Some(&EventType::Deleted));
    assert!(kinds[..kinds.len() - 1]
        .iter()
        .all(|k| *k == EventType::Modified));

    // A new file at the old path is not the watched file
    touch(&file);
    std::fs::remove_file(&file).unwrap();
    events.assert_quiet();
}

#[test]
fn test_two_file_scenario_with_rename() {
    let (_dir, root) = scratch();
    let a = root.join("a.txt");
    let b = root.join("b.txt");
    let c = root.join("c.txt");
    touch(&a);
    touch(&b);

    let watcher = native();
    let (observer, events) = recorder();
    let _handle = watcher.watch_files([&a, &b], observer).unwrap();

    append(&a, "Hello, World!\n");
    events.until(&a, EventType::Modified);

    append(&b, "Goodbye, World!\n");
    events.until(&b, EventType::Modified);

    std::fs::remove_file(&a).unwrap();
    events.until(&a, EventType::Deleted);

    std::fs::rename(&b, &c).unwrap();
    events.until(&b, EventType::Deleted);

    // Exactly one Deleted for b, nothing for c
    std::fs::remove_file(&c).unwrap();
    events.assert_quiet();
}

#[test]
fn test_symlink_spelling_is_preserved() {
    let (_dir, root) = scratch();
    let real = root.join("real.txt");
    let link = root.join("link.txt");
    touch(&real);
    std::os::unix::fs::symlink(&real, &link).unwrap();

    let watcher = native();
    let (observer, events) = recorder();
    let _handle = watcher.watch_file(&link, observer).unwrap();

    append(&real, "through the link\n");
    let (path, kind) = events.next_event(EVENT_TIMEOUT).unwrap();
    assert_eq!(path, link);
    assert_eq!(kind, EventType::Modified);
}

#[test]
fn test_relative_spelling_is_preserved() {
    // The scratch directory lives in the working directory; address it by name
    let dir = tempfile::tempdir_in(".").unwrap();
    let file = PathBuf::from(dir.path().file_name().unwrap()).join("relative.txt");
    assert!(file.is_relative());
    touch(&file);

    let watcher = native();
    let (observer, events) = recorder();
    let _handle = watcher.watch_file(&file, observer).unwrap();

    append(&file, "relative\n");
    let (path, kind) = events.next_event(EVENT_TIMEOUT).unwrap();
    assert_eq!(path, file);
    assert_eq!(kind, EventType::Modified);
}

#[test]
fn test_recursive_picks_up_new_subdirectory() {
    let (_dir, root) = scratch();
    let sub = root.join("sub");
    let nested = sub.join("nested.txt");

    let watcher = native();
    let (observer, events) = recorder();
    let _handle = watcher.watch_recursively(&root, observer).unwrap();

    std::fs::create_dir(&sub).unwrap();
    touch(&nested);

    events.until(&sub, EventType::Created);
    events.until(&nested, EventType::Created);
}

#[test]
fn test_recursive_reports_entries_created_with_their_directory() {
    let (_dir, root) = scratch();

    let watcher = native();
    let (observer, events) = recorder();
    let _handle = watcher.watch_recursively(&root, observer).unwrap();

    // No pause between the directory and its contents
    for round in 0..10 {
        let sub = root.join(format!("burst{round}"));
        let nested = sub.join("inner").join("f.txt");
        std::fs::create_dir_all(nested.parent().unwrap()).unwrap();
        std::fs::write(&nested, b"x").unwrap();

        events.until(&sub, EventType::Created);
        events.until(&nested, EventType::Created);
    }
}

#[test]
fn test_recursive_rewrites_symlinked_root() {
    let (_dir, root) = scratch();
    let real = root.join("real");
    let link = root.join("link");
    std::fs::create_dir(&real).unwrap();
    std::os::unix::fs::symlink(&real, &link).unwrap();

    let watcher = native();
    let (observer, events) = recorder();
    let _handle = watcher.watch_recursively(&link, observer).unwrap();

    touch(&real.join("inside.txt"));
    events.until(&link.join("inside.txt"), EventType::Created);
}

#[test]
fn test_no_delivery_after_cancel() {
    let (_dir, root) = scratch();
    let file = root.join("cancel.txt");
    touch(&file);

    let watcher = native();
    let (observer, events) = recorder();
    let handle = watcher.watch_file(&file, observer).unwrap();

    append(&file, "before\n");
    events.until(&file, EventType::Modified);

    handle.cancel();
    handle.cancel();
    events.discard_pending();
    append(&file, "after\n");
    std::fs::remove_file(&file).unwrap();
    events.assert_quiet();
}
