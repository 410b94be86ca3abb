mod common;

use cardcat_volume::{
    EntryKind, ImportOutcome, ImportState, VolumeError, VolumeEvent,
};
use common::{drain, key, replica_volume, source_log, writable_volume, write_tree};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn import_events(events: &[VolumeEvent]) -> Vec<(EntryKind, String, f64)> {
    events
        .iter()
        .filter_map(|e| match e {
            VolumeEvent::ImportProgress(p) => Some((p.kind, p.path.clone(), p.progress)),
            _ => None,
        })
        .collect()
}

// ── Puts ─────────────────────────────────────────────────────────

#[tokio::test]
async fn three_files_three_puts_then_complete() {
    let dir = TempDir::new().unwrap();
    write_tree(
        dir.path(),
        &[
            ("Austen/Emma/emma.epub", b"emma"),
            ("Austen/Persuasion/persuasion.epub", b"persuasion"),
            ("notes.txt", b"notes"),
        ],
    );
    let (_backend, volume) = writable_volume(dir.path()).await;
    let mut rx = volume.subscribe();

    let outcome = volume.import_files(dir.path()).await.unwrap();
    assert_eq!(outcome, ImportOutcome::Completed { puts: 3, deletes: 0 });

    let events = drain(&mut rx);
    let puts = import_events(&events);
    assert_eq!(puts.len(), 3);
    assert!(puts.iter().all(|(kind, _, _)| *kind == EntryKind::Put));
    assert_eq!(puts[2].2, 100.0);
    assert!(puts.windows(2).all(|w| w[0].2 < w[1].2));
    assert_eq!(puts[0].1, "/Austen/Emma/emma.epub");

    match events.last().unwrap() {
        VolumeEvent::ImportComplete { key, path } => {
            assert_eq!(*key, volume.key());
            assert_eq!(path, &dir.path().display().to_string());
        }
        other => panic!("expected import-complete, got {other:?}"),
    }

    let session = volume.import_session().await;
    assert_eq!(session.state, ImportState::Done);
    assert_eq!(session.total_expected, 3);
    assert_eq!(session.completed, 3);
    assert_eq!(volume.version(), 3);
    assert_eq!(volume.metadata_progress().downloaded, 4);
}

#[tokio::test]
async fn put_events_carry_stats() {
    let dir = TempDir::new().unwrap();
    write_tree(dir.path(), &[("a.txt", b"hello")]);
    let (_backend, volume) = writable_volume(dir.path()).await;
    let mut rx = volume.subscribe();
    volume.import_files(dir.path()).await.unwrap();

    let VolumeEvent::ImportProgress(put) = drain(&mut rx).remove(0) else {
        panic!("expected import-progress");
    };
    let stat = put.stat.unwrap();
    assert_eq!(stat.size, 5);
    assert_eq!(stat.blocks, 1);
}

#[tokio::test]
async fn subdirectory_paths_are_relative_to_volume_root() {
    let dir = TempDir::new().unwrap();
    write_tree(dir.path(), &[("incoming/book.epub", b"b")]);
    let (_backend, volume) = writable_volume(dir.path()).await;
    let mut rx = volume.subscribe();

    volume.import_files(&dir.path().join("incoming")).await.unwrap();
    let puts = import_events(&drain(&mut rx));
    assert_eq!(puts[0].1, "/incoming/book.epub");

    let listed = volume.list_contents("/").await.unwrap();
    assert_eq!(listed[0].path, "/book.epub");
}

#[tokio::test]
async fn log_directory_is_skipped() {
    let dir = TempDir::new().unwrap();
    write_tree(dir.path(), &[(".dat/metadata", b"x"), ("kept.txt", b"y")]);
    let (_backend, volume) = writable_volume(dir.path()).await;

    volume.import_files(dir.path()).await.unwrap();
    let paths: Vec<_> = volume
        .list_contents("/")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.path)
        .collect();
    assert_eq!(paths, vec!["/kept.txt"]);
}

#[cfg(unix)]
#[tokio::test]
async fn symlinks_are_followed() {
    let dir = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    write_tree(outside.path(), &[("real.txt", b"data")]);
    std::os::unix::fs::symlink(outside.path().join("real.txt"), dir.path().join("link.txt")).unwrap();
    let (_backend, volume) = writable_volume(dir.path()).await;

    volume.import_files(dir.path()).await.unwrap();
    let listed = volume.list_contents("/").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].path, "/link.txt");
    assert_eq!(listed[0].stat.as_ref().unwrap().size, 4);
}

// ── Re-import & deletes ──────────────────────────────────────────

#[tokio::test]
async fn unchanged_files_are_not_reimported() {
    let dir = TempDir::new().unwrap();
    write_tree(dir.path(), &[("a.txt", b"a"), ("b.txt", b"b")]);
    let (_backend, volume) = writable_volume(dir.path()).await;
    volume.import_files(dir.path()).await.unwrap();
    let version = volume.version();

    let outcome = volume.import_files(dir.path()).await.unwrap();
    assert_eq!(outcome, ImportOutcome::Completed { puts: 0, deletes: 0 });
    assert_eq!(volume.version(), version);
}

#[tokio::test]
async fn removed_files_become_deletes() {
    let dir = TempDir::new().unwrap();
    write_tree(dir.path(), &[("a.txt", b"a"), ("b.txt", b"b")]);
    let (_backend, volume) = writable_volume(dir.path()).await;
    volume.import_files(dir.path()).await.unwrap();

    std::fs::remove_file(dir.path().join("b.txt")).unwrap();
    let mut rx = volume.subscribe();
    let outcome = volume.import_files(dir.path()).await.unwrap();
    assert_eq!(outcome, ImportOutcome::Completed { puts: 0, deletes: 1 });

    let events = import_events(&drain(&mut rx));
    assert_eq!(events, vec![(EntryKind::Del, "/b.txt".to_string(), 100.0)]);

    let paths: Vec<_> = volume
        .list_contents("/")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.path)
        .collect();
    assert_eq!(paths, vec!["/a.txt"]);
}

#[tokio::test]
async fn deletes_do_not_advance_completed() {
    let dir = TempDir::new().unwrap();
    write_tree(dir.path(), &[("a.txt", b"a"), ("b.txt", b"b")]);
    let (_backend, volume) = writable_volume(dir.path()).await;
    volume.import_files(dir.path()).await.unwrap();

    std::fs::remove_file(dir.path().join("b.txt")).unwrap();
    write_tree(dir.path(), &[("c.txt", b"c"), ("d.txt", b"d")]);
    let mut rx = volume.subscribe();
    volume.import_files(dir.path()).await.unwrap();

    let events = import_events(&drain(&mut rx));
    assert_eq!(
        events,
        vec![
            (EntryKind::Put, "/c.txt".to_string(), 50.0),
            (EntryKind::Put, "/d.txt".to_string(), 100.0),
            (EntryKind::Del, "/b.txt".to_string(), 100.0),
        ]
    );
    assert_eq!(volume.import_session().await.completed, 2);
}

// ── Guards ───────────────────────────────────────────────────────

#[tokio::test]
async fn read_only_volume_does_not_import() {
    let source = source_log(key(3), &[]).await;
    let dir = TempDir::new().unwrap();
    write_tree(dir.path(), &[("a.txt", b"a")]);
    let (_replica, volume) = replica_volume(dir.path(), &source).await;
    let mut rx = volume.subscribe();

    let outcome = volume.import_files(dir.path()).await.unwrap();
    assert_eq!(outcome, ImportOutcome::NotApplicable);
    assert!(drain(&mut rx).is_empty());
    assert_eq!(volume.import_session().await.state, ImportState::Idle);
}

#[tokio::test]
async fn concurrent_import_is_rejected() {
    let dir = TempDir::new().unwrap();
    write_tree(dir.path(), &[("a.txt", b"a")]);
    let (_backend, volume) = writable_volume(dir.path()).await;

    let (first, second) = tokio::join!(
        volume.import_files(dir.path()),
        volume.import_files(dir.path())
    );
    assert_eq!(first.unwrap(), ImportOutcome::Completed { puts: 1, deletes: 0 });
    assert!(matches!(second, Err(VolumeError::ImportInProgress)));

    // The guard is released once the first import finished.
    assert!(volume.import_files(dir.path()).await.is_ok());
}

#[tokio::test]
async fn missing_directory_fails_the_import() {
    let dir = TempDir::new().unwrap();
    let (_backend, volume) = writable_volume(dir.path()).await;
    let mut rx = volume.subscribe();

    let err = volume
        .import_files(&dir.path().join("nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, VolumeError::Import(_)));
    assert!(drain(&mut rx).is_empty());
    assert_eq!(volume.import_session().await.state, ImportState::Idle);
}

#[tokio::test]
async fn import_after_close_is_cancelled() {
    let dir = TempDir::new().unwrap();
    write_tree(dir.path(), &[("a.txt", b"a")]);
    let (_backend, volume) = writable_volume(dir.path()).await;
    volume.close().await.unwrap();

    let err = volume.import_files(dir.path()).await.unwrap_err();
    assert!(matches!(err, VolumeError::Cancelled));
}

#[tokio::test]
async fn run_imports_the_volume_directory() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    write_tree(dir.path(), &[("Austen/Emma/emma.epub", b"emma")]);
    let (_backend, volume) = writable_volume(dir.path()).await;
    let mut rx = volume.subscribe();

    volume.run().await.unwrap();
    common::wait_for(&mut rx, |e| matches!(e, VolumeEvent::ImportComplete { .. })).await;

    let listed = volume.list_contents("/Austen").await.unwrap();
    assert_eq!(listed.len(), 1);
    volume.close().await.unwrap();
}
