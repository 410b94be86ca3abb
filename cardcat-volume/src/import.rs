//! Local file import.
//!
//! Mirrors a local directory into the log: every new or changed file is
//! appended as a put, every log path missing from the directory is
//! appended as a delete. Progress is published per entry as it lands.

use crate::config::ScanPolicy;
use crate::error::{VolumeError, VolumeResult};
use crate::events::{EventBus, ImportProgress, VolumeEvent};
use crate::log::ArchiveLog;
use crate::progress::percentage;
use crate::tree;
use cardcat_types::{EntryKind, EntryStat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Directory the log keeps its own bookkeeping in; never imported.
const LOG_DIR: &str = ".dat";

/// Where an import session is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportState {
    #[default]
    Idle,
    Scanning,
    Active,
    Done,
}

/// Counters of the running (or last) import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportSession {
    pub state: ImportState,
    /// Entries the scan counted; 0 until counted.
    pub total_expected: u64,
    /// Puts written so far.
    pub completed: u64,
    pub progress: f64,
}

impl ImportSession {
    fn put_progress(&self) -> f64 {
        percentage(self.completed, self.total_expected)
    }

    fn del_progress(&self) -> f64 {
        if self.total_expected == 0 {
            100.0
        } else {
            percentage(self.completed, self.total_expected)
        }
    }

    fn is_running(&self) -> bool {
        matches!(self.state, ImportState::Scanning | ImportState::Active)
    }
}

/// What an import did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The volume is not writable; nothing was imported.
    NotApplicable,
    Completed { puts: u64, deletes: u64 },
}

/// A file found by the scan.
#[derive(Debug)]
struct ScannedFile {
    source: PathBuf,
    /// `/`-rooted path relative to the import root.
    archive_path: String,
    size: u64,
    mtime: Option<u64>,
}

/// Imports local directories into a log.
pub struct FileImportPipeline {
    log: Arc<dyn ArchiveLog>,
    bus: EventBus,
    policy: ScanPolicy,
    session: RwLock<ImportSession>,
    running: AtomicBool,
}

impl FileImportPipeline {
    pub fn new(log: Arc<dyn ArchiveLog>, bus: EventBus, policy: ScanPolicy) -> Self {
        if policy.watch {
            warn!("Watching is not supported; imports are one-shot");
        }
        Self {
            log,
            bus,
            policy,
            session: RwLock::new(ImportSession::default()),
            running: AtomicBool::new(false),
        }
    }

    /// Snapshot of the current session.
    pub async fn session(&self) -> ImportSession {
        *self.session.read().await
    }

    /// Progress of a running import, `None` when idle or done.
    pub async fn active_progress(&self) -> Option<f64> {
        let session = self.session.read().await;
        session.is_running().then_some(session.progress)
    }

    /// Imports `import_root`. Event paths are reported relative to
    /// `volume_root`.
    pub async fn run(
        &self,
        import_root: &Path,
        volume_root: &Path,
        cancel: &CancellationToken,
    ) -> VolumeResult<ImportOutcome> {
        if !self.log.writable() {
            debug!("Volume {} is not writable, skipping import", self.log.key());
            return Ok(ImportOutcome::NotApplicable);
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(VolumeError::ImportInProgress);
        }

        let result = self.import(import_root, volume_root, cancel).await;
        {
            let mut session = self.session.write().await;
            session.state = match result {
                Ok(_) => ImportState::Done,
                Err(_) => ImportState::Idle,
            };
        }
        self.running.store(false, Ordering::SeqCst);

        match &result {
            Ok(ImportOutcome::Completed { puts, deletes }) => {
                info!(
                    "Imported {} ({} puts, {} deletes)",
                    import_root.display(),
                    puts,
                    deletes
                );
                self.bus.publish(VolumeEvent::ImportComplete {
                    key: self.log.key(),
                    path: import_root.display().to_string(),
                });
            }
            Ok(ImportOutcome::NotApplicable) => {}
            Err(e) => warn!("Import of {} failed: {}", import_root.display(), e),
        }
        result
    }

    async fn import(
        &self,
        import_root: &Path,
        volume_root: &Path,
        cancel: &CancellationToken,
    ) -> VolumeResult<ImportOutcome> {
        if cancel.is_cancelled() {
            return Err(VolumeError::Cancelled);
        }
        *self.session.write().await = ImportSession {
            state: ImportState::Scanning,
            ..Default::default()
        };
        info!("Importing files under {}", import_root.display());

        let existing = tree::replay(&*self.log).await.map_err(import_error)?;
        let root = import_root.to_path_buf();
        let follow_links = self.policy.dereference;
        let scanned = tokio::task::spawn_blocking(move || scan(&root, follow_links))
            .await
            .map_err(|e| VolumeError::Import(e.to_string()))??;

        let seen: HashSet<String> = scanned.iter().map(|f| f.archive_path.clone()).collect();
        let changed: Vec<ScannedFile> = scanned
            .into_iter()
            .filter(|file| {
                existing.get(&file.archive_path).and_then(|e| e.stat.as_ref()).is_none_or(
                    |stat| stat.size != file.size || stat.mtime != file.mtime,
                )
            })
            .collect();
        let removed: Vec<String> = existing
            .keys()
            .filter(|path| !seen.contains(*path))
            .cloned()
            .collect();

        {
            let mut session = self.session.write().await;
            if self.policy.count {
                session.total_expected = changed.len() as u64;
            }
            session.state = ImportState::Active;
        }
        debug!(
            "Scan found {} changed and {} removed files",
            changed.len(),
            removed.len()
        );

        let mut pending = Vec::new();
        let mut puts = 0;
        for file in changed {
            if cancel.is_cancelled() {
                return Err(VolumeError::Cancelled);
            }
            let stat = self
                .log
                .put_file(&file.archive_path, &file.source)
                .await
                .map_err(import_error)?;
            puts += 1;
            let progress = {
                let mut session = self.session.write().await;
                session.completed += 1;
                session.progress = session.put_progress();
                session.progress
            };
            let path = display_path(volume_root, &file.source, &file.archive_path);
            pending.push(self.progress_event(path, Some(stat), progress, EntryKind::Put));
            self.flush(&mut pending);
        }

        let mut deletes = 0;
        for archive_path in removed {
            if cancel.is_cancelled() {
                return Err(VolumeError::Cancelled);
            }
            self.log.delete(&archive_path).await.map_err(import_error)?;
            deletes += 1;
            let progress = {
                let mut session = self.session.write().await;
                session.progress = session.del_progress();
                session.progress
            };
            let source = import_root.join(archive_path.trim_start_matches('/'));
            let path = display_path(volume_root, &source, &archive_path);
            pending.push(self.progress_event(path, None, progress, EntryKind::Del));
            self.flush(&mut pending);
        }

        self.publish_all(&mut pending);
        Ok(ImportOutcome::Completed { puts, deletes })
    }

    fn progress_event(
        &self,
        path: String,
        stat: Option<EntryStat>,
        progress: f64,
        kind: EntryKind,
    ) -> VolumeEvent {
        VolumeEvent::ImportProgress(ImportProgress {
            key: self.log.key(),
            path,
            stat,
            progress,
            kind,
        })
    }

    /// Publishes buffered events when running live.
    fn flush(&self, pending: &mut Vec<VolumeEvent>) {
        if self.policy.live {
            self.publish_all(pending);
        }
    }

    fn publish_all(&self, pending: &mut Vec<VolumeEvent>) {
        for event in pending.drain(..) {
            self.bus.publish(event);
        }
    }
}

fn import_error(err: VolumeError) -> VolumeError {
    match err {
        VolumeError::Cancelled | VolumeError::Import(_) => err,
        other => VolumeError::Import(other.to_string()),
    }
}

/// Lists regular files under `root`, skipping the log's own directory.
fn scan(root: &Path, follow_links: bool) -> VolumeResult<Vec<ScannedFile>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.file_name() != LOG_DIR);
    for entry in walker {
        let entry = entry.map_err(|e| VolumeError::Import(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = entry
            .metadata()
            .map_err(|e| VolumeError::Import(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| VolumeError::Import(e.to_string()))?;
        files.push(ScannedFile {
            source: entry.path().to_path_buf(),
            archive_path: volume_path(relative),
            size: meta.len(),
            mtime: meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs()),
        });
    }
    Ok(files)
}

/// `/`-rooted, `/`-separated form of a relative path.
fn volume_path(relative: &Path) -> String {
    let segments: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("/{}", segments.join("/"))
}

/// Path of `source` relative to the volume root, or the archive path when
/// the file lives outside it.
fn display_path(volume_root: &Path, source: &Path, archive_path: &str) -> String {
    source
        .strip_prefix(volume_root)
        .map(volume_path)
        .unwrap_or_else(|_| archive_path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_paths_are_rooted() {
        assert_eq!(volume_path(Path::new("Austen/Emma/e.epub")), "/Austen/Emma/e.epub");
        assert_eq!(volume_path(Path::new("")), "/");
    }

    #[test]
    fn display_path_strips_volume_root() {
        let shown = display_path(
            Path::new("/vol"),
            Path::new("/vol/books/a.epub"),
            "/a.epub",
        );
        assert_eq!(shown, "/books/a.epub");
        let outside = display_path(Path::new("/vol"), Path::new("/tmp/a.epub"), "/a.epub");
        assert_eq!(outside, "/a.epub");
    }

    #[test]
    fn delete_only_session_reports_full() {
        let session = ImportSession::default();
        assert_eq!(session.del_progress(), 100.0);
        assert_eq!(session.put_progress(), 0.0);
    }
}
