//! Log entries as seen by the volume layer.
//!
//! The metadata log is an ordered sequence of nodes. Each node either puts a
//! file at a path (carrying its stat) or deletes the path. A `LogEntry` is
//! the decoded, indexed form of one such node; entries are produced on demand
//! and never stored by the volume itself.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether an entry adds or removes a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Put,
    Del,
}

impl EntryKind {
    /// Returns the wire label of the kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Put => "put",
            Self::Del => "del",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File stat recorded with a put entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryStat {
    /// File size in bytes.
    pub size: u64,
    /// Number of content blocks the file occupies.
    pub blocks: u64,
    /// Index of the first content block.
    pub offset: u64,
    /// Byte position of the first content block in the content log.
    #[serde(default)]
    pub byte_offset: u64,
    /// Modification time, unix seconds.
    #[serde(default)]
    pub mtime: Option<u64>,
    /// Change time, unix seconds.
    #[serde(default)]
    pub ctime: Option<u64>,
}

impl EntryStat {
    /// Inclusive content block range `(start, end)`, or `None` for empty
    /// files and for ranges that do not fit in `u64`.
    #[must_use]
    pub fn block_range(&self) -> Option<(u64, u64)> {
        let last = self.blocks.checked_sub(1)?;
        let end = self.offset.checked_add(last)?;
        Some((self.offset, end))
    }

    /// Whether the given content block belongs to this file.
    #[must_use]
    pub fn contains_block(&self, index: u64) -> bool {
        self.block_range()
            .is_some_and(|(start, end)| index >= start && index <= end)
    }
}

/// A decoded metadata entry at a given log index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Index of the entry in the metadata log.
    pub version: u64,
    /// Put or delete.
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// `/`-rooted path inside the volume.
    pub path: String,
    /// Present only for puts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat: Option<EntryStat>,
}

impl LogEntry {
    /// Creates a put entry.
    #[must_use]
    pub fn put(version: u64, path: impl Into<String>, stat: EntryStat) -> Self {
        Self {
            version,
            kind: EntryKind::Put,
            path: path.into(),
            stat: Some(stat),
        }
    }

    /// Creates a delete entry.
    #[must_use]
    pub fn del(version: u64, path: impl Into<String>) -> Self {
        Self {
            version,
            kind: EntryKind::Del,
            path: path.into(),
            stat: None,
        }
    }

    /// Returns true for put entries.
    #[must_use]
    pub fn is_put(&self) -> bool {
        self.kind == EntryKind::Put
    }
}
