//! Progress arithmetic shared by the trackers.

use crate::log::NetworkStats;
use serde::{Deserialize, Serialize};

/// `done / total * 100`, clamped to `[0, 100]`; 0 when `total` is 0.
pub fn percentage(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (done as f64 / total as f64 * 100.0).min(100.0)
}

/// Point-in-time view of a replication process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub downloaded: u64,
    pub total: u64,
    pub percentage: f64,
    pub peer_count: u32,
    pub download_speed: f64,
    pub upload_speed: f64,
}

impl ProgressSnapshot {
    /// Builds a snapshot, deriving the percentage from the counts.
    pub fn new(downloaded: u64, total: u64, network: NetworkStats) -> Self {
        Self {
            downloaded,
            total,
            percentage: percentage(downloaded, total),
            peer_count: network.peers.total,
            download_speed: network.download_speed,
            upload_speed: network.upload_speed,
        }
    }
}
