//! Content replication tracking.
//!
//! Maps each arriving content block back to the file that owns it and
//! publishes that file's completion as `content-progress`.

use crate::error::VolumeResult;
use crate::events::{ContentProgress, EventBus, VolumeEvent};
use crate::log::ArchiveLog;
use crate::progress::percentage;
use crate::tree;
use cardcat_types::ArchiveKey;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

/// The file owning a content block and its inclusive block range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRange {
    pub file: String,
    pub start: u64,
    pub end: u64,
}

/// Finds the file whose content range contains block `index`.
pub async fn find_entry_by_content_block(
    log: &dyn ArchiveLog,
    index: u64,
) -> VolumeResult<Option<ContentRange>> {
    let files = tree::replay(log).await?;
    Ok(files.into_values().find_map(|entry| {
        let (start, end) = entry.stat.as_ref()?.block_range()?;
        (start..=end).contains(&index).then(|| ContentRange {
            file: entry.path,
            start,
            end,
        })
    }))
}

/// Publishes per-file content progress.
#[derive(Debug)]
pub struct ContentProgressTracker {
    key: ArchiveKey,
    bus: EventBus,
    listening: AtomicBool,
    in_flight: Mutex<HashSet<u64>>,
    progress: Mutex<HashMap<String, f64>>,
}

impl ContentProgressTracker {
    pub fn new(key: ArchiveKey, bus: EventBus) -> Self {
        Self {
            key,
            bus,
            listening: AtomicBool::new(false),
            in_flight: Mutex::new(HashSet::new()),
            progress: Mutex::new(HashMap::new()),
        }
    }

    /// Starts listening for content blocks. Returns `false` if already
    /// listening; the tracker is only ever attached once.
    pub fn start_listening(&self) -> bool {
        let started = self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if started {
            debug!("Listening for content blocks of {}", self.key);
        }
        started
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Last published progress for `file`.
    pub fn file_progress(&self, file: &str) -> Option<f64> {
        lock(&self.progress).get(file).copied()
    }

    /// Handles a downloaded content block.
    ///
    /// Returns the published event, or `None` when the block belongs to no
    /// known file or a lookup for the same block is already running.
    pub async fn handle_block(
        &self,
        log: &dyn ArchiveLog,
        index: u64,
    ) -> VolumeResult<Option<ContentProgress>> {
        let Some(_guard) = InFlight::claim(&self.in_flight, index) else {
            trace!("Lookup for content block {} already running", index);
            return Ok(None);
        };

        let Some(range) = find_entry_by_content_block(log, index).await? else {
            debug!("Content block {} of {} has no owning file", index, self.key);
            return Ok(None);
        };

        let mut got = log.content_downloaded(range.start, range.end);
        if log.content_has(range.end) {
            got += 1;
        }
        let total = range.end - range.start + 1;

        let progress = {
            let mut files = lock(&self.progress);
            let entry = files.entry(range.file.clone()).or_insert(0.0);
            *entry = entry.max(percentage(got, total));
            *entry
        };

        let event = ContentProgress {
            key: self.key,
            file: range.file,
            progress,
        };
        self.bus.publish(VolumeEvent::ContentProgress(event.clone()));
        Ok(Some(event))
    }
}

/// Marks a block index as being looked up until dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<u64>>,
    index: u64,
}

impl<'a> InFlight<'a> {
    fn claim(set: &'a Mutex<HashSet<u64>>, index: u64) -> Option<Self> {
        lock(set).insert(index).then_some(Self { set, index })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.index);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
