//! Metadata replication tracking.
//!
//! Turns metadata-block arrivals into `metadata-progress` events and keeps
//! the volume's metadata completion. Also provides [`MetadataWalk`], a
//! resumable pass over the blocks that are already local, so a client can
//! hydrate its own state from replicated history before live events start.

use crate::error::{VolumeError, VolumeResult};
use crate::events::{EventBus, MetadataProgress, VolumeEvent};
use crate::log::{ArchiveLog, NetworkStats};
use crate::progress::{percentage, ProgressSnapshot};
use cardcat_types::{ArchiveKey, EntryKind, EntryStat, Header, LogEntry, Node};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tracks how much of the metadata log is local.
#[derive(Debug)]
pub struct MetadataProgressTracker {
    key: ArchiveKey,
    bus: EventBus,
    downloaded: AtomicU64,
    complete: AtomicBool,
}

impl MetadataProgressTracker {
    /// Creates a tracker seeded with the log's current local block count.
    pub fn new(key: ArchiveKey, bus: EventBus, downloaded: u64, version: u64) -> Self {
        let downloaded = downloaded.min(version + 1);
        Self {
            key,
            bus,
            downloaded: AtomicU64::new(downloaded),
            complete: AtomicBool::new(downloaded == version + 1),
        }
    }

    /// Number of metadata blocks counted as local.
    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::SeqCst)
    }

    /// Whether metadata is fully synced.
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    /// Replaces the local block count, e.g. after an import appended blocks.
    pub fn reset_downloaded(&self, downloaded: u64) {
        self.downloaded.store(downloaded, Ordering::SeqCst);
    }

    /// Metadata completion for the given version; 0 while only the header
    /// exists.
    pub fn percentage(&self, version: u64) -> f64 {
        if version == 0 {
            return 0.0;
        }
        percentage(self.downloaded(), version + 1)
    }

    /// Snapshot of metadata replication.
    pub fn snapshot(&self, version: u64, network: NetworkStats) -> ProgressSnapshot {
        let mut snapshot = ProgressSnapshot::new(self.downloaded(), version + 1, network);
        snapshot.percentage = self.percentage(version);
        snapshot
    }

    /// Handles a metadata block that arrived from a peer.
    ///
    /// The header block is only checked for the archive format; a mismatch
    /// is logged and processing carries on. Any other block is decoded and
    /// published as `metadata-progress`. Returns the decoded entry.
    pub fn handle_block(
        &self,
        index: u64,
        data: &[u8],
        version: u64,
        network: NetworkStats,
    ) -> Option<LogEntry> {
        let cap = version + 1;
        let _ = self
            .downloaded
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some((n + 1).min(cap)));

        if index == 0 {
            match Header::decode(data) {
                Ok(header) if !header.is_archive() => {
                    let err = VolumeError::HeaderMismatch { found: header.kind };
                    warn!("Volume {}: {}", self.key, err);
                }
                Ok(_) => {}
                Err(e) => warn!("Volume {}: undecodable header block: {}", self.key, e),
            }
            return None;
        }

        let entry = match Node::decode(data) {
            Ok(node) => node.into_entry(index),
            Err(e) => {
                warn!("Volume {}: undecodable metadata block {}: {}", self.key, index, e);
                return None;
            }
        };

        let progress = self.percentage(version);
        debug!("Downloaded {}/{}: {}", index, version + 1, entry.path);
        self.bus
            .publish(VolumeEvent::MetadataProgress(MetadataProgress {
                key: self.key,
                version: index,
                kind: entry.kind,
                progress,
                path: entry.path.clone(),
                stat: entry.stat.clone(),
                download_speed: network.download_speed,
                upload_speed: network.upload_speed,
                peer_count: network.peers.total,
            }));
        Some(entry)
    }

    /// Handles the log's fully-synced notification.
    pub fn handle_synced(&self) {
        self.complete.store(true, Ordering::SeqCst);
        info!("Metadata synced for {}", self.key);
        self.bus
            .publish(VolumeEvent::MetadataComplete { key: self.key });
    }
}

/// One element of a [`MetadataWalk`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkEntry {
    pub version: u64,
    pub key: ArchiveKey,
    pub progress: f64,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub path: String,
    pub stat: Option<EntryStat>,
}

/// A resumable pass over metadata blocks that are already local.
///
/// Visits local indices of `[start, version]` in increasing order, with
/// `version` sampled when the walk is created. Missing blocks are skipped.
/// The walk ends after the first failed lookup. Resume from a saved
/// position by starting a new walk at the last consumed index plus one.
pub struct MetadataWalk {
    log: Arc<dyn ArchiveLog>,
    key: ArchiveKey,
    cursor: u64,
    end: u64,
    imported: u64,
    total: u64,
    cancel: CancellationToken,
    finished: bool,
}

impl MetadataWalk {
    /// Starts a walk at `start`. Index 0 is the header and is never visited.
    pub fn new(log: Arc<dyn ArchiveLog>, start: u64, cancel: CancellationToken) -> Self {
        let start = start.max(1);
        Self {
            key: log.key(),
            end: log.version(),
            total: log.metadata_downloaded(),
            log,
            cursor: start,
            imported: start,
            cancel,
            finished: false,
        }
    }

    /// Next index the walk will consider.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Last index the walk can visit.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Resolves the next local entry. Returns `None` once the walk is over.
    pub async fn next(&mut self) -> Option<VolumeResult<WalkEntry>> {
        if self.finished {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.finished = true;
            return Some(Err(VolumeError::Cancelled));
        }
        let Some(index) = self.log.metadata_next_downloaded(self.cursor, self.end) else {
            self.finished = true;
            return None;
        };
        self.cursor = index + 1;

        let log = self.log.clone();
        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(VolumeError::Cancelled),
            data = log.metadata_get(index) => data,
        };
        match result.and_then(|data| Ok(Node::decode(&data)?)) {
            Ok(node) => {
                self.imported += 1;
                let entry = node.into_entry(index);
                Some(Ok(WalkEntry {
                    version: index,
                    key: self.key,
                    progress: percentage(self.imported, self.total),
                    kind: entry.kind,
                    path: entry.path,
                    stat: entry.stat,
                }))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }

    /// Applies `sink` to every entry in order. Stops at the first failure
    /// of either the lookup or the sink. Returns how many entries the sink
    /// accepted.
    pub async fn for_each<F, Fut>(mut self, mut sink: F) -> VolumeResult<u64>
    where
        F: FnMut(WalkEntry) -> Fut,
        Fut: Future<Output = VolumeResult<()>>,
    {
        let mut visited = 0;
        while let Some(entry) = self.next().await {
            sink(entry?).await?;
            visited += 1;
        }
        Ok(visited)
    }

    /// Turns the walk into a stream. The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = VolumeResult<WalkEntry>> + Send {
        futures::stream::unfold(self, |mut walk| async move {
            walk.next().await.map(|item| (item, walk))
        })
    }
}
