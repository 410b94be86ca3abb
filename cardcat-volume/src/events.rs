//! Volume events and the bus they are published on.
//!
//! Trackers and the import pipeline publish onto one shared [`EventBus`];
//! consumers subscribe through [`Volume::subscribe`](crate::Volume::subscribe)
//! and unsubscribe by dropping the receiver.

use cardcat_types::{ArchiveKey, EntryKind, EntryStat};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// A metadata entry arrived from a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataProgress {
    pub key: ArchiveKey,
    /// Index of the entry in the metadata log.
    pub version: u64,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Metadata completion, 0–100.
    pub progress: f64,
    pub path: String,
    pub stat: Option<EntryStat>,
    pub download_speed: f64,
    pub upload_speed: f64,
    pub peer_count: u32,
}

/// A content block of a file arrived from a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentProgress {
    pub key: ArchiveKey,
    pub file: String,
    /// Share of the file's blocks that are local, 0–100.
    pub progress: f64,
}

/// A local file was imported into (or removed from) the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportProgress {
    pub key: ArchiveKey,
    /// Path relative to the volume root.
    pub path: String,
    pub stat: Option<EntryStat>,
    /// Import completion, 0–100.
    pub progress: f64,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

/// Everything a volume publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum VolumeEvent {
    MetadataProgress(MetadataProgress),
    MetadataComplete { key: ArchiveKey },
    ContentProgress(ContentProgress),
    ImportProgress(ImportProgress),
    ImportComplete { key: ArchiveKey, path: String },
    PeerConnected { key: ArchiveKey },
}

impl VolumeEvent {
    /// Returns the event's name as published.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MetadataProgress(_) => "metadata-progress",
            Self::MetadataComplete { .. } => "metadata-complete",
            Self::ContentProgress(_) => "content-progress",
            Self::ImportProgress(_) => "import-progress",
            Self::ImportComplete { .. } => "import-complete",
            Self::PeerConnected { .. } => "peer-connected",
        }
    }
}

/// Broadcast channel shared by a volume and its trackers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<VolumeEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<VolumeEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event. Returns how many subscribers received it.
    pub fn publish(&self, event: VolumeEvent) -> usize {
        trace!("Publishing {}", event.name());
        self.sender.send(event).unwrap_or(0)
    }
}
