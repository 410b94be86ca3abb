//! Library volumes over a replicated append-only log.
//!
//! A volume is one replicated log plus the local directory it maps to. This
//! crate turns the log's raw replication feed into progress figures and
//! events, imports local files into the log, and reads the collections and
//! manifest stored alongside them.
//!
//! ## Components
//!
//! - **Log**: the [`ArchiveLog`] and [`LogBackend`] traits the volume
//!   consumes, plus an in-process [`MemoryLog`]
//! - **Trackers**: metadata and content replication progress
//! - **Import**: mirrors a local directory into the log
//! - **Collections** and **Manifest**: documents stored in the volume
//! - **Volume**: the façade tying them together
//!
//! # Example
//!
//! ```no_run
//! use cardcat_volume::{MemoryBackend, Volume, VolumeConfig};
//!
//! # async fn example() -> cardcat_volume::VolumeResult<()> {
//! let backend = MemoryBackend::new();
//! let volume = Volume::create(VolumeConfig::new("/srv/books", "Books"), &backend).await?;
//! let mut events = volume.subscribe();
//! volume.run().await?;
//! while let Ok(event) = events.recv().await {
//!     println!("{}", event.name());
//! }
//! # Ok(())
//! # }
//! ```

pub mod collections;
pub mod config;
pub mod content;
mod error;
pub mod events;
mod files;
pub mod format;
pub mod import;
pub mod log;
pub mod manifest;
pub mod metadata;
pub mod progress;
pub mod state;
pub mod tree;
mod volume;

pub use collections::{
    Collection, CollectionDocument, CollectionIndex, CollectionInfo, CollectionProvider,
    JsonCollectionProvider,
};
pub use config::{OpenOptions, ScanPolicy, VolumeConfig, DEFAULT_EVENT_CAPACITY};
pub use content::{find_entry_by_content_block, ContentProgressTracker, ContentRange};
pub use error::{VolumeError, VolumeResult};
pub use events::{ContentProgress, EventBus, ImportProgress, MetadataProgress, VolumeEvent};
pub use format::FormatHistogram;
pub use import::{FileImportPipeline, ImportOutcome, ImportSession, ImportState};
pub use log::{
    ArchiveLog, LogBackend, LogEvent, MemoryBackend, MemoryLog, NetworkStats, PeerCount,
    CONTENT_BLOCK_SIZE,
};
pub use manifest::{Manifest, ManifestStore};
pub use metadata::{MetadataProgressTracker, MetadataWalk, WalkEntry};
pub use progress::{percentage, ProgressSnapshot};
pub use state::{ArchiveHandle, FilesCount, VolumeStats};
pub use volume::Volume;

pub use cardcat_types::{ArchiveKey, EntryKind, EntryStat, LogEntry};
