//! Snapshots a volume hands out.

use crate::log::PeerCount;
use cardcat_types::ArchiveKey;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identity and shape of a volume's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveHandle {
    pub key: ArchiveKey,
    pub directory: PathBuf,
    pub writable: bool,
    pub version: u64,
    pub indexing: bool,
}

/// File counts maintained by the embedding application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesCount {
    pub have: u64,
    pub total: u64,
}

/// Composite view of a volume for display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeStats {
    pub peers: PeerCount,
    /// Content size in bytes.
    pub size: u64,
    pub files_count: Option<FilesCount>,
    /// Import progress while importing, metadata progress otherwise.
    pub metadata: f64,
    /// Share of counted files that are local, 0–100.
    pub downloaded: f64,
    pub download_speed: f64,
    pub upload_speed: f64,
}
