//! Volume configuration.

use cardcat_types::ArchiveKey;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default capacity of the volume event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration for a library volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Local directory the volume is mapped to. Created if missing.
    pub directory: PathBuf,
    /// Human-readable volume name, used as the manifest title.
    pub name: String,
    /// Key of an existing log to open. `None` creates a new log.
    #[serde(default)]
    pub key: Option<ArchiveKey>,
    /// URL scheme written into the manifest.
    pub url_scheme: String,
    /// Manifest path relative to the volume root.
    pub manifest_file: String,
    /// Directory inside the volume holding the collection index.
    pub collections_root: String,
    /// Capacity of the event channel; slow subscribers lag past this.
    pub event_capacity: usize,
}

impl VolumeConfig {
    /// Creates a config for a new volume at `directory`.
    pub fn new(directory: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Opens an existing log with the given key instead of creating one.
    pub fn with_key(mut self, key: ArchiveKey) -> Self {
        self.key = Some(key);
        self
    }
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            name: String::new(),
            key: None,
            url_scheme: "dat".to_string(),
            manifest_file: "dat.json".to_string(),
            collections_root: "dat-collections".to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Options the log is opened with.
///
/// Volumes always open with [`OpenOptions::fixed`]; the fields exist so log
/// backends can see what is being asked of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOptions {
    /// Keep only the latest version of files, not the full history.
    pub latest: bool,
    /// Index files in place in the volume directory.
    pub indexing: bool,
}

impl OpenOptions {
    /// The options every volume uses.
    #[must_use]
    pub const fn fixed() -> Self {
        Self {
            latest: true,
            indexing: true,
        }
    }
}

/// How the import pipeline scans the local tree.
///
/// Volumes always import with [`ScanPolicy::fixed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPolicy {
    /// Keep watching for changes after the first pass.
    pub watch: bool,
    /// Count entries before importing so progress has a total.
    pub count: bool,
    /// Follow symlinks.
    pub dereference: bool,
    /// Publish progress for every entry as it lands.
    pub live: bool,
}

impl ScanPolicy {
    /// One-shot snapshot import with live, counted progress.
    #[must_use]
    pub const fn fixed() -> Self {
        Self {
            watch: false,
            count: true,
            dereference: true,
            live: true,
        }
    }
}
