//! Error types for the volume layer.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for volume operations.
pub type VolumeResult<T> = Result<T, VolumeError>;

/// Errors that can occur in volume operations.
#[derive(Debug, Error)]
pub enum VolumeError {
    /// The backing log could not be opened or created.
    #[error("failed to open log: {0}")]
    Open(String),

    /// The backing log could not be released.
    #[error("failed to close log: {0}")]
    Close(String),

    /// The header block declares a format other than the archive format.
    /// Never returned from an operation; only logged.
    #[error("header is not an archive: {found}")]
    HeaderMismatch { found: String },

    /// The import pipeline failed.
    #[error("import failed: {0}")]
    Import(String),

    /// An import is already running on this volume.
    #[error("an import is already running")]
    ImportInProgress,

    /// A collection could not be opened or read.
    #[error("collection error: {0}")]
    Collection(String),

    /// The manifest could not be read or parsed.
    #[error("manifest read error: {0}")]
    ManifestRead(String),

    /// A file operation inside the volume directory failed.
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The log reported a failure.
    #[error("log error: {0}")]
    Log(String),

    /// A block payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] cardcat_types::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The operation was cancelled because the volume closed.
    #[error("operation cancelled")]
    Cancelled,

    /// The log handle has been released.
    #[error("log is closed")]
    Closed,
}

impl VolumeError {
    /// Wraps an I/O error with the path it happened at.
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }
}
