//! Log layer abstraction.
//!
//! Defines the interface a volume needs from the replicated log it wraps.
//! Replication, peer discovery and the on-disk layout all live behind these
//! traits; the volume only reads blocks, appends entries and listens to the
//! block-downloaded feed.

pub mod memory;

use crate::config::OpenOptions;
use crate::error::VolumeResult;
use async_trait::async_trait;
use cardcat_types::{ArchiveKey, EntryStat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

pub use memory::{MemoryBackend, MemoryLog, CONTENT_BLOCK_SIZE};

/// A notification from the log's replication feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// A metadata block arrived from a peer.
    MetadataBlock { index: u64, data: Vec<u8> },
    /// Every metadata block up to the current version is local.
    MetadataSynced,
    /// The content log became available.
    ContentReady,
    /// A content block arrived from a peer.
    ContentBlock { index: u64 },
    /// A peer connected.
    PeerConnected,
}

/// Peer counts reported by the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerCount {
    /// Connected peers.
    pub total: u32,
    /// Connected peers holding the complete volume.
    pub complete: u32,
}

/// Instantaneous network figures for a log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub peers: PeerCount,
    /// Bytes per second.
    pub download_speed: f64,
    /// Bytes per second.
    pub upload_speed: f64,
}

/// Opens logs for volumes.
#[async_trait]
pub trait LogBackend: Send + Sync {
    /// Opens the log for `directory`, creating a new writable one when `key`
    /// is `None`.
    async fn open_or_create(
        &self,
        directory: &Path,
        key: Option<ArchiveKey>,
        options: &OpenOptions,
    ) -> VolumeResult<Arc<dyn ArchiveLog>>;
}

/// A replicated log holding one volume: a metadata log of entries and a
/// content log of file blocks.
///
/// `version` is the index of the newest metadata block; block 0 is the
/// header, so the metadata log holds `version + 1` blocks.
#[async_trait]
pub trait ArchiveLog: Send + Sync {
    /// Returns the log's key.
    fn key(&self) -> ArchiveKey;

    /// Returns whether this process may append to the log.
    fn writable(&self) -> bool;

    /// Returns the index of the newest metadata block.
    fn version(&self) -> u64;

    // ── Metadata ─────────────────────────────────────────────────

    /// Whether metadata block `index` is available locally.
    fn metadata_has(&self, index: u64) -> bool;

    /// Number of metadata blocks available locally.
    fn metadata_downloaded(&self) -> u64;

    /// Reads a local metadata block.
    async fn metadata_get(&self, index: u64) -> VolumeResult<Vec<u8>>;

    /// First locally available metadata index in `[from, to]`.
    fn metadata_next_downloaded(&self, from: u64, to: u64) -> Option<u64> {
        (from..=to).find(|i| self.metadata_has(*i))
    }

    /// Requests every metadata block from peers.
    async fn download_metadata(&self) -> VolumeResult<()>;

    // ── Content ──────────────────────────────────────────────────

    /// Whether the content log exists yet. Fresh remote volumes have no
    /// content log until the header names one.
    fn content_available(&self) -> bool;

    /// Whether content block `index` is available locally.
    fn content_has(&self, index: u64) -> bool;

    /// Number of locally available content blocks in `[start, end)`.
    fn content_downloaded(&self, start: u64, end: u64) -> u64;

    /// Byte length of the content log as last seen.
    fn content_byte_length(&self) -> u64;

    /// Refreshes the content byte length from peers.
    async fn refresh_content_length(&self) -> VolumeResult<()>;

    /// Requests content from peers: everything for `None`, otherwise the
    /// file or directory at the given path.
    async fn download(&self, path: Option<&str>) -> VolumeResult<()>;

    /// Reads a whole file out of the log.
    async fn read_file(&self, path: &str) -> VolumeResult<Vec<u8>>;

    // ── Writes ───────────────────────────────────────────────────

    /// Appends a put entry for `path` with the contents of `source`.
    async fn put_file(&self, path: &str, source: &Path) -> VolumeResult<EntryStat>;

    /// Appends a delete entry for `path`.
    async fn delete(&self, path: &str) -> VolumeResult<()>;

    // ── Network ──────────────────────────────────────────────────

    /// Joins the replication network for this log.
    async fn join_network(&self) -> VolumeResult<()>;

    /// Returns current network figures.
    fn network_stats(&self) -> NetworkStats;

    /// Subscribes to the replication feed.
    fn subscribe(&self) -> broadcast::Receiver<LogEvent>;

    /// Releases the log.
    async fn close(&self) -> VolumeResult<()>;
}
