//! File tree replay.
//!
//! The log only stores put/del nodes. The current file tree is whatever the
//! newest node for each path says, so listing, content lookups and the
//! import deletion pass all rebuild it by replaying local metadata blocks.

use crate::error::VolumeResult;
use crate::log::ArchiveLog;
use cardcat_types::{EntryKind, LogEntry, Node};
use std::collections::BTreeMap;

/// Latest put entry per path, built from the metadata blocks that are
/// local. Blocks not downloaded yet are skipped.
pub async fn replay(log: &dyn ArchiveLog) -> VolumeResult<BTreeMap<String, LogEntry>> {
    let version = log.version();
    let mut tree = BTreeMap::new();
    let mut next = 1;
    while let Some(index) = log.metadata_next_downloaded(next, version) {
        let entry = Node::decode(&log.metadata_get(index).await?)?.into_entry(index);
        match entry.kind {
            EntryKind::Put => {
                tree.insert(entry.path.clone(), entry);
            }
            EntryKind::Del => {
                tree.remove(&entry.path);
            }
        }
        next = index + 1;
    }
    Ok(tree)
}

/// Entries at or below `below`, in path order. `below` may omit the
/// leading `/`.
pub fn entries_below(tree: &BTreeMap<String, LogEntry>, below: &str) -> Vec<LogEntry> {
    let trimmed = below.trim_matches('/');
    let prefix = if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    };
    tree.values()
        .filter(|entry| {
            prefix.is_empty()
                || entry.path == prefix
                || entry
                    .path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
        .cloned()
        .collect()
}
