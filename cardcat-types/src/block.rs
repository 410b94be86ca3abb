//! Block payloads of the metadata log.
//!
//! Block 0 of every metadata log is a [`Header`] naming the archive format.
//! Every later block is a [`Node`]: a path plus an optional stat, where a
//! missing stat marks a deletion. Payloads are JSON encoded.

use crate::{EntryKind, EntryStat, LogEntry, Result};
use serde::{Deserialize, Serialize};

/// Format marker a volume's header block is expected to carry.
pub const ARCHIVE_FORMAT: &str = "hyperdrive";

/// The header block (index 0) of a metadata log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Declared archive format.
    #[serde(rename = "type")]
    pub kind: String,
    /// Key of the content log, hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Header {
    /// Creates a header for the standard archive format.
    #[must_use]
    pub fn archive(content: Option<String>) -> Self {
        Self {
            kind: ARCHIVE_FORMAT.to_string(),
            content,
        }
    }

    /// Whether this header declares the expected archive format.
    #[must_use]
    pub fn is_archive(&self) -> bool {
        self.kind == ARCHIVE_FORMAT
    }

    /// Decodes a header from a raw block.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Encodes the header into a raw block.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// A file node block (index ≥ 1) of a metadata log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub path: String,
    /// Stat for puts; `None` marks a deletion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<EntryStat>,
}

impl Node {
    /// Decodes a node from a raw block.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Encodes the node into a raw block.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Returns whether the node puts or deletes its path.
    #[must_use]
    pub fn kind(&self) -> EntryKind {
        if self.value.is_some() {
            EntryKind::Put
        } else {
            EntryKind::Del
        }
    }

    /// Converts the node into a log entry at the given index.
    #[must_use]
    pub fn into_entry(self, version: u64) -> LogEntry {
        LogEntry {
            version,
            kind: self.kind(),
            path: self.path,
            stat: self.value,
        }
    }
}

impl From<&LogEntry> for Node {
    fn from(entry: &LogEntry) -> Self {
        Self {
            path: entry.path.clone(),
            value: entry.stat.clone(),
        }
    }
}
