//! Core type definitions for cardcat.
//!
//! This crate defines the plain data types shared by every layer of a
//! library volume:
//! - The content-address key of a volume
//! - Log entries (put/del) and their file stat
//! - The block payloads carried by the metadata log (header and nodes)
//!
//! Nothing here performs I/O. Replication, import and progress tracking
//! live in `cardcat-volume`.

mod block;
mod entry;
mod key;

pub use block::{Header, Node, ARCHIVE_FORMAT};
pub use entry::{EntryKind, EntryStat, LogEntry};
pub use key::{ArchiveKey, KEY_LEN};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}
