#![allow(dead_code)]

use cardcat_volume::{
    ArchiveKey, ArchiveLog, MemoryBackend, MemoryLog, Volume, VolumeConfig, VolumeEvent,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Routes log output to the test harness. Safe to call from every test.
pub fn init_tracing() {
    tracing_subscriber::fmt::try_init().ok();
}

pub fn key(byte: u8) -> ArchiveKey {
    ArchiveKey::from_bytes([byte; 32])
}

/// Writes `files` (path, content) under `root`.
pub fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
    for (path, content) in files {
        let target = root.join(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(target, content).unwrap();
    }
}

/// A writable log holding `files`, each put from a scratch file.
pub async fn source_log(key: ArchiveKey, files: &[(&str, Vec<u8>)]) -> MemoryLog {
    let log = MemoryLog::create(key).unwrap();
    let scratch = TempDir::new().unwrap();
    for (i, (path, content)) in files.iter().enumerate() {
        let file = scratch.path().join(format!("f{i}"));
        std::fs::write(&file, content).unwrap();
        log.put_file(path, &file).await.unwrap();
    }
    log
}

/// A writable volume on a fresh backend.
pub async fn writable_volume(dir: &Path) -> (Arc<MemoryBackend>, Volume) {
    let backend = Arc::new(MemoryBackend::new());
    let volume = Volume::create(VolumeConfig::new(dir, "Books"), backend.as_ref())
        .await
        .unwrap();
    (backend, volume)
}

/// A read-only volume replicating `source`. Nothing is local yet.
pub async fn replica_volume(dir: &Path, source: &MemoryLog) -> (Arc<MemoryLog>, Volume) {
    let backend = MemoryBackend::new();
    let replica = Arc::new(MemoryLog::replica_of(source));
    backend.register(replica.clone());
    let config = VolumeConfig::new(dir, "Replica").with_key(source.key());
    let volume = Volume::create(config, &backend).await.unwrap();
    (replica, volume)
}

/// Waits for the first event matching `pred`.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<VolumeEvent>, mut pred: F) -> VolumeEvent
where
    F: FnMut(&VolumeEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event stream ended: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Everything already published on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<VolumeEvent>) -> Vec<VolumeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
