mod common;

use cardcat_types::{EntryKind, Header};
use cardcat_volume::{
    EventBus, MetadataProgressTracker, MetadataWalk, NetworkStats, PeerCount,
    VolumeError, VolumeEvent,
};
use common::{key, replica_volume, source_log, wait_for};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn books() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("/Austen/Emma/emma.epub", b"emma".to_vec()),
        ("/Austen/Persuasion/persuasion.epub", b"persuasion".to_vec()),
        ("/Bronte/Villette/villette.epub", b"villette".to_vec()),
    ]
}

// ── Tracker ──────────────────────────────────────────────────────

#[test]
fn tracker_starts_complete_when_everything_is_local() {
    let tracker = MetadataProgressTracker::new(key(1), EventBus::new(8), 4, 3);
    assert!(tracker.is_complete());
    assert_eq!(tracker.percentage(3), 100.0);

    let partial = MetadataProgressTracker::new(key(1), EventBus::new(8), 2, 3);
    assert!(!partial.is_complete());
    assert_eq!(partial.percentage(3), 50.0);
}

#[test]
fn header_only_log_reports_zero() {
    let tracker = MetadataProgressTracker::new(key(1), EventBus::new(8), 1, 0);
    assert_eq!(tracker.percentage(0), 0.0);
}

#[test]
fn foreign_header_is_not_fatal() {
    let bus = EventBus::new(8);
    let mut rx = bus.subscribe();
    let tracker = MetadataProgressTracker::new(key(1), bus, 0, 1);

    let header = br#"{"type":"hypertrie"}"#;
    assert!(tracker.handle_block(0, header, 1, NetworkStats::default()).is_none());
    assert!(rx.try_recv().is_err());

    let node = br#"{"path":"/a.txt","value":{"size":1,"blocks":1,"offset":0}}"#;
    let entry = tracker
        .handle_block(1, node, 1, NetworkStats::default())
        .unwrap();
    assert_eq!(entry.path, "/a.txt");
    assert_eq!(tracker.downloaded(), 2);
}

#[test]
fn progress_event_carries_entry_and_network() {
    let bus = EventBus::new(8);
    let mut rx = bus.subscribe();
    let tracker = MetadataProgressTracker::new(key(2), bus, 1, 3);
    let network = NetworkStats {
        peers: PeerCount { total: 2, complete: 1 },
        download_speed: 512.0,
        upload_speed: 64.0,
    };

    let node = br#"{"path":"/gone.txt"}"#;
    tracker.handle_block(2, node, 3, network);

    match rx.try_recv().unwrap() {
        VolumeEvent::MetadataProgress(progress) => {
            assert_eq!(progress.key, key(2));
            assert_eq!(progress.version, 2);
            assert_eq!(progress.kind, EntryKind::Del);
            assert_eq!(progress.path, "/gone.txt");
            assert_eq!(progress.stat, None);
            assert_eq!(progress.progress, 50.0);
            assert_eq!(progress.peer_count, 2);
            assert_eq!(progress.download_speed, 512.0);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn downloaded_never_exceeds_log_length() {
    let tracker = MetadataProgressTracker::new(key(1), EventBus::new(8), 0, 2);
    let node = br#"{"path":"/a"}"#;
    for _ in 0..10 {
        tracker.handle_block(1, node, 2, NetworkStats::default());
    }
    assert_eq!(tracker.downloaded(), 3);
    assert_eq!(tracker.percentage(2), 100.0);
}

#[test]
fn undecodable_block_is_counted_but_not_published() {
    let bus = EventBus::new(8);
    let mut rx = bus.subscribe();
    let tracker = MetadataProgressTracker::new(key(1), bus, 0, 2);
    assert!(tracker.handle_block(1, b"garbage", 2, NetworkStats::default()).is_none());
    assert_eq!(tracker.downloaded(), 1);
    assert!(rx.try_recv().is_err());
}

#[test]
fn synced_marks_complete() {
    let bus = EventBus::new(8);
    let mut rx = bus.subscribe();
    let tracker = MetadataProgressTracker::new(key(3), bus, 0, 5);
    tracker.handle_synced();
    assert!(tracker.is_complete());
    assert_eq!(rx.try_recv().unwrap(), VolumeEvent::MetadataComplete { key: key(3) });
}

// ── Replication through a volume ─────────────────────────────────

#[tokio::test]
async fn replicated_metadata_publishes_progress() {
    common::init_tracing();
    let source = source_log(key(7), &books()).await;
    let dir = TempDir::new().unwrap();
    let (replica, volume) = replica_volume(dir.path(), &source).await;
    assert!(!volume.is_yours());
    assert_eq!(volume.version(), 3);
    assert_eq!(volume.metadata_progress().downloaded, 0);

    let mut rx = volume.subscribe();
    volume.run().await.unwrap();
    assert!(replica.joined());
    assert!(replica.metadata_requested());

    for index in 0..=3 {
        assert!(replica.deliver_metadata(index));
    }
    replica.announce_synced();

    let last = wait_for(&mut rx, |e| {
        matches!(e, VolumeEvent::MetadataProgress(p) if p.version == 3)
    })
    .await;
    let VolumeEvent::MetadataProgress(last) = last else { unreachable!() };
    assert_eq!(last.path, "/Bronte/Villette/villette.epub");
    assert_eq!(last.progress, 100.0);

    wait_for(&mut rx, |e| matches!(e, VolumeEvent::MetadataComplete { .. })).await;
    assert!(volume.metadata_complete());
    assert_eq!(volume.metadata_progress().percentage, 100.0);
    assert_eq!(volume.format().as_deref(), Some("A/B/C"));

    volume.close().await.unwrap();
}

// ── Walk ─────────────────────────────────────────────────────────

async fn partial_replica() -> Arc<cardcat_volume::MemoryLog> {
    let files: Vec<_> = (0..5)
        .map(|i| (["/a", "/b", "/c", "/d", "/e"][i], vec![i as u8]))
        .collect();
    let source = source_log(key(9), &files).await;
    let replica = Arc::new(cardcat_volume::MemoryLog::replica_of(&source));
    for index in [0, 1, 2, 4, 5] {
        replica.preload_metadata(index);
    }
    replica
}

#[tokio::test]
async fn walk_skips_missing_indices() {
    let replica = partial_replica().await;
    let walk = MetadataWalk::new(replica.clone(), 1, CancellationToken::new());
    let entries: Vec<_> = walk
        .into_stream()
        .map(|entry| entry.unwrap())
        .collect()
        .await;

    let versions: Vec<u64> = entries.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![1, 2, 4, 5]);
    assert_eq!(entries[0].path, "/a");
    assert!(entries.iter().all(|e| e.key == key(9)));
    assert!(entries.windows(2).all(|w| w[0].progress <= w[1].progress));
}

#[tokio::test]
async fn walk_never_visits_the_header() {
    let replica = partial_replica().await;
    let mut walk = MetadataWalk::new(replica, 0, CancellationToken::new());
    let first = walk.next().await.unwrap().unwrap();
    assert_eq!(first.version, 1);
}

#[tokio::test]
async fn walk_resumes_from_cursor() {
    let replica = partial_replica().await;
    let mut walk = MetadataWalk::new(replica.clone(), 1, CancellationToken::new());
    assert_eq!(walk.end(), 5);
    walk.next().await.unwrap().unwrap();
    walk.next().await.unwrap().unwrap();
    let cursor = walk.cursor();
    assert_eq!(cursor, 3);

    let mut resumed = MetadataWalk::new(replica, cursor, CancellationToken::new());
    assert_eq!(resumed.next().await.unwrap().unwrap().version, 4);
    assert_eq!(resumed.next().await.unwrap().unwrap().version, 5);
    assert!(resumed.next().await.is_none());
}

#[tokio::test]
async fn walk_past_the_end_is_empty() {
    let replica = partial_replica().await;
    let mut walk = MetadataWalk::new(replica, 6, CancellationToken::new());
    assert!(walk.next().await.is_none());
}

#[tokio::test]
async fn walk_stops_at_first_failure() {
    let replica = partial_replica().await;
    replica.fail_reads_at(2);
    let mut walk = MetadataWalk::new(replica, 1, CancellationToken::new());

    assert_eq!(walk.next().await.unwrap().unwrap().version, 1);
    assert!(matches!(walk.next().await, Some(Err(VolumeError::Log(_)))));
    assert!(walk.next().await.is_none());
}

#[tokio::test]
async fn for_each_stops_when_the_sink_fails() {
    let replica = partial_replica().await;
    let walk = MetadataWalk::new(replica, 1, CancellationToken::new());
    let mut seen = Vec::new();
    let result = walk
        .for_each(|entry| {
            seen.push(entry.version);
            let stop = entry.version == 2;
            async move {
                if stop {
                    Err(VolumeError::Collection("sink full".into()))
                } else {
                    Ok(())
                }
            }
        })
        .await;

    assert!(matches!(result, Err(VolumeError::Collection(_))));
    assert_eq!(seen, vec![1, 2]);
}

#[tokio::test]
async fn walk_through_volume_hydrates_and_cancels_on_close() {
    let source = source_log(key(4), &books()).await;
    let dir = TempDir::new().unwrap();
    let (replica, volume) = replica_volume(dir.path(), &source).await;
    for index in 0..=3 {
        replica.preload_metadata(index);
    }

    let mut paths = Vec::new();
    let visited = volume
        .on_each_metadata(1, |entry| {
            paths.push(entry.path);
            async { Ok(()) }
        })
        .await
        .unwrap();
    assert_eq!(visited, 3);
    assert_eq!(paths[0], "/Austen/Emma/emma.epub");

    volume.close().await.unwrap();
    let mut walk = volume.metadata_walk(1);
    assert!(matches!(walk.next().await, Some(Err(VolumeError::Cancelled))));
}

#[test]
fn header_round_trip_keeps_format() {
    let header = Header::archive(Some("ab".into()));
    assert!(Header::decode(&header.encode().unwrap()).unwrap().is_archive());
}
