//! The volume façade.
//!
//! A [`Volume`] owns one log handle and the local directory it maps to. It
//! wires the trackers to the log's replication feed, runs imports, and
//! republishes everything on a single event bus.

use crate::collections::{CollectionIndex, CollectionInfo, CollectionProvider, JsonCollectionProvider};
use crate::config::{OpenOptions, ScanPolicy, VolumeConfig};
use crate::content::ContentProgressTracker;
use crate::error::{VolumeError, VolumeResult};
use crate::events::{EventBus, VolumeEvent};
use crate::files;
use crate::format::FormatHistogram;
use crate::import::{FileImportPipeline, ImportOutcome, ImportSession};
use crate::log::{ArchiveLog, LogBackend, LogEvent, NetworkStats, PeerCount};
use crate::manifest::{Manifest, ManifestStore};
use crate::metadata::{MetadataProgressTracker, MetadataWalk, WalkEntry};
use crate::progress::{percentage, ProgressSnapshot};
use crate::state::{ArchiveHandle, FilesCount, VolumeStats};
use crate::tree;
use cardcat_types::{ArchiveKey, LogEntry};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Where a volume lives; changes on rename.
#[derive(Debug, Clone)]
struct Place {
    directory: PathBuf,
    name: String,
}

/// A library volume backed by a replicated log.
///
/// Cheap to clone; clones share the same volume.
#[derive(Clone)]
pub struct Volume {
    /// Key of the backing log.
    key: ArchiveKey,
    /// Configuration the volume was created with.
    config: Arc<VolumeConfig>,
    /// Current directory and name.
    place: Arc<RwLock<Place>>,
    /// The backing log.
    log: Arc<dyn ArchiveLog>,
    /// Bus every tracker publishes on.
    bus: EventBus,
    /// Highest log version observed.
    version: Arc<AtomicU64>,
    metadata: Arc<MetadataProgressTracker>,
    content: Arc<ContentProgressTracker>,
    importer: Arc<FileImportPipeline>,
    collections: Arc<CollectionIndex>,
    /// Path patterns seen in put entries.
    formats: Arc<Mutex<FormatHistogram>>,
    files_count: Arc<Mutex<Option<FilesCount>>>,
    /// Set once a peer connected; network figures are reported from then on.
    tracking_stats: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    /// Cancelled on close; stops the event loop, imports and walks.
    shutdown: CancellationToken,
}

impl Volume {
    /// Opens (or creates) the volume described by `config`.
    pub async fn create(config: VolumeConfig, backend: &dyn LogBackend) -> VolumeResult<Self> {
        Self::with_provider(config, backend, Arc::new(JsonCollectionProvider)).await
    }

    /// Opens a volume that reads collections through `provider`.
    pub async fn with_provider(
        config: VolumeConfig,
        backend: &dyn LogBackend,
        provider: Arc<dyn CollectionProvider>,
    ) -> VolumeResult<Self> {
        tokio::fs::create_dir_all(&config.directory)
            .await
            .map_err(|e| VolumeError::Open(format!("{}: {}", config.directory.display(), e)))?;

        let log = backend
            .open_or_create(&config.directory, config.key, &OpenOptions::fixed())
            .await
            .map_err(|e| match e {
                VolumeError::Open(_) => e,
                other => VolumeError::Open(other.to_string()),
            })?;

        let key = log.key();
        let version = log.version();
        let bus = EventBus::new(config.event_capacity);
        let metadata = MetadataProgressTracker::new(key, bus.clone(), log.metadata_downloaded(), version);
        info!(
            "Opened volume {} at {} (version {}, writable: {}, complete: {})",
            key,
            config.directory.display(),
            version,
            log.writable(),
            metadata.is_complete()
        );

        Ok(Self {
            key,
            place: Arc::new(RwLock::new(Place {
                directory: config.directory.clone(),
                name: config.name.clone(),
            })),
            version: Arc::new(AtomicU64::new(version)),
            metadata: Arc::new(metadata),
            content: Arc::new(ContentProgressTracker::new(key, bus.clone())),
            importer: Arc::new(FileImportPipeline::new(log.clone(), bus.clone(), ScanPolicy::fixed())),
            collections: Arc::new(CollectionIndex::new(provider, log.clone(), config.collections_root.clone())),
            formats: Arc::new(Mutex::new(FormatHistogram::new())),
            files_count: Arc::new(Mutex::new(None)),
            tracking_stats: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
            config: Arc::new(config),
            log,
            bus,
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Starts the volume: joins the network, requests all metadata, starts
    /// tracking replication and imports the volume directory in the
    /// background (writable volumes only). Calling it again after a
    /// successful start is a no-op; a failed start can be retried.
    pub async fn run(&self) -> VolumeResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VolumeError::Closed);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Volume {} already running", self.key);
            return Ok(());
        }

        let feed = self.log.subscribe();
        if let Err(e) = self.start_replication().await {
            self.running.store(false, Ordering::SeqCst);
            warn!("Starting volume {} failed: {}", self.key, e);
            return Err(e);
        }

        let events = self.clone();
        tokio::spawn(async move { events.event_loop(feed).await });

        let importer = self.clone();
        tokio::spawn(async move {
            let root = importer.directory();
            match importer.import_files(&root).await {
                Ok(outcome) => debug!("Background import of {}: {:?}", importer.key, outcome),
                Err(VolumeError::Cancelled) => debug!("Background import of {} cancelled", importer.key),
                Err(e) => debug!("Background import of {} ended: {}", importer.key, e),
            }
        });

        if self.log.content_available() {
            self.content.start_listening();
        }
        info!("Volume {} running", self.key);
        Ok(())
    }

    async fn start_replication(&self) -> VolumeResult<()> {
        self.log.join_network().await?;
        self.log.download_metadata().await
    }

    /// Whether this process owns the volume and may write to it.
    pub fn is_yours(&self) -> bool {
        self.log.writable()
    }

    /// Stops all work and releases the log. Later calls do nothing.
    pub async fn close(&self) -> VolumeResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Volume {} already closed", self.key);
            return Ok(());
        }
        self.shutdown.cancel();
        if let Err(e) = self.log.close().await {
            self.closed.store(false, Ordering::SeqCst);
            return Err(match e {
                VolumeError::Close(_) => e,
                other => VolumeError::Close(other.to_string()),
            });
        }
        info!("Closed volume {}", self.key);
        Ok(())
    }

    /// Whether [`close`](Self::close) succeeded.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn event_loop(self, mut feed: broadcast::Receiver<LogEvent>) {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = feed.recv() => event,
            };
            match event {
                Ok(event) => self.handle_log_event(event),
                Err(RecvError::Lagged(missed)) => {
                    warn!("Volume {} missed {} log events", self.key, missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Event loop of {} stopped", self.key);
    }

    fn handle_log_event(&self, event: LogEvent) {
        match event {
            LogEvent::MetadataBlock { index, data } => {
                let version = self.version();
                if let Some(entry) = self.metadata.handle_block(index, &data, version, self.network()) {
                    if entry.is_put() {
                        self.record_path_format(&entry.path);
                    }
                }
            }
            LogEvent::MetadataSynced => self.metadata.handle_synced(),
            LogEvent::ContentReady => {
                self.content.start_listening();
            }
            LogEvent::ContentBlock { index } => {
                if !self.content.is_listening() {
                    trace!("Ignoring content block {}, not listening", index);
                    return;
                }
                let this = self.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = this.shutdown.cancelled() => {}
                        result = this.content.handle_block(&*this.log, index) => {
                            if let Err(e) = result {
                                debug!("Content lookup for block {} failed: {}", index, e);
                            }
                        }
                    }
                });
            }
            LogEvent::PeerConnected => {
                self.tracking_stats.store(true, Ordering::SeqCst);
                let stats = self.log.network_stats();
                info!(
                    "Peer connected to {} ({} peers, {} complete)",
                    self.key, stats.peers.total, stats.peers.complete
                );
                self.bus.publish(VolumeEvent::PeerConnected { key: self.key });
            }
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn key(&self) -> ArchiveKey {
        self.key
    }

    pub fn name(&self) -> String {
        read(&self.place).name.clone()
    }

    pub fn directory(&self) -> PathBuf {
        read(&self.place).directory.clone()
    }

    /// Newest log version seen. Never decreases.
    pub fn version(&self) -> u64 {
        let current = self.log.version();
        self.version.fetch_max(current, Ordering::SeqCst).max(current)
    }

    /// Snapshot of the log's identity.
    pub fn handle(&self) -> ArchiveHandle {
        ArchiveHandle {
            key: self.key,
            directory: self.directory(),
            writable: self.log.writable(),
            version: self.version(),
            indexing: OpenOptions::fixed().indexing,
        }
    }

    /// Metadata replication progress.
    pub fn metadata_progress(&self) -> ProgressSnapshot {
        self.metadata.snapshot(self.version(), self.network())
    }

    /// Whether metadata is fully synced.
    pub fn metadata_complete(&self) -> bool {
        self.metadata.is_complete()
    }

    pub fn peers(&self) -> PeerCount {
        self.network().peers
    }

    /// Content size in bytes; 0 until the content log exists.
    pub async fn byte_length(&self) -> u64 {
        if !self.log.content_available() {
            return 0;
        }
        if self.log.content_byte_length() == 0 {
            if let Err(e) = self.log.refresh_content_length().await {
                debug!("Refreshing content length of {} failed: {}", self.key, e);
            }
        }
        self.log.content_byte_length()
    }

    /// Composite view for display.
    pub async fn more_stats(&self) -> VolumeStats {
        let network = self.network();
        let files_count = *lock(&self.files_count);
        let metadata = match self.importer.active_progress().await {
            Some(progress) => progress,
            None => self.metadata.percentage(self.version()),
        };
        VolumeStats {
            peers: network.peers,
            size: self.byte_length().await,
            files_count,
            metadata,
            downloaded: files_count.map_or(0.0, |c| percentage(c.have, c.total)),
            download_speed: network.download_speed,
            upload_speed: network.upload_speed,
        }
    }

    /// Subscribes to volume events; drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<VolumeEvent> {
        self.bus.subscribe()
    }

    /// State of the running or last import.
    pub async fn import_session(&self) -> ImportSession {
        self.importer.session().await
    }

    fn network(&self) -> NetworkStats {
        if self.tracking_stats.load(Ordering::SeqCst) {
            self.log.network_stats()
        } else {
            NetworkStats::default()
        }
    }

    // ── Formats & counts ─────────────────────────────────────────

    /// Adds the depth pattern of `path` to the format histogram.
    pub fn record_path_format(&self, path: &str) {
        lock(&self.formats).observe_path(path);
    }

    /// The most common path pattern seen so far.
    pub fn format(&self) -> Option<String> {
        lock(&self.formats).dominant_format().map(str::to_string)
    }

    pub fn set_files_count(&self, have: u64, total: u64) {
        *lock(&self.files_count) = Some(FilesCount { have, total });
    }

    /// Bumps `total` when `total` is set, `have` otherwise.
    pub fn increment_files_count(&self, total: bool) {
        let mut count = lock(&self.files_count);
        let count = count.get_or_insert_with(FilesCount::default);
        if total {
            count.total += 1;
        } else {
            count.have += 1;
        }
    }

    pub fn files_count(&self) -> Option<FilesCount> {
        *lock(&self.files_count)
    }

    // ── Import ───────────────────────────────────────────────────

    /// Imports `path` into the log. Only writable volumes import.
    pub async fn import_files(&self, path: &Path) -> VolumeResult<ImportOutcome> {
        let outcome = self
            .importer
            .run(path, &self.directory(), &self.shutdown)
            .await?;
        if let ImportOutcome::Completed { .. } = outcome {
            self.metadata.reset_downloaded(self.log.metadata_downloaded());
            self.version();
        }
        Ok(outcome)
    }

    // ── Metadata walk ────────────────────────────────────────────

    /// Walks the local metadata entries from `start`.
    pub fn metadata_walk(&self, start: u64) -> MetadataWalk {
        MetadataWalk::new(self.log.clone(), start, self.shutdown.child_token())
    }

    /// Feeds every local metadata entry from `start` to `sink`, in order.
    pub async fn on_each_metadata<F, Fut>(&self, start: u64, sink: F) -> VolumeResult<u64>
    where
        F: FnMut(WalkEntry) -> Fut,
        Fut: Future<Output = VolumeResult<()>>,
    {
        self.metadata_walk(start).for_each(sink).await
    }

    // ── Contents ─────────────────────────────────────────────────

    /// Current files at or below `below`, sorted by path.
    pub async fn list_contents(&self, below: &str) -> VolumeResult<Vec<LogEntry>> {
        let files = tree::replay(&*self.log).await?;
        Ok(tree::entries_below(&files, below))
    }

    /// Requests content from peers: everything when `filename` is `None` or
    /// empty, otherwise that file or directory.
    pub async fn download_content(&self, filename: Option<&str>) -> VolumeResult<()> {
        match filename.filter(|f| !f.is_empty()) {
            None => {
                info!("Downloading all content of {}", self.key);
                self.log.download(None).await?;
            }
            Some(name) => {
                let path = format!("/{}", name.trim_start_matches('/'));
                info!("Downloading {} of {}", path, self.key);
                self.log.download(Some(&path)).await?;
            }
        }
        if self.log.content_available() {
            self.content.start_listening();
        }
        Ok(())
    }

    /// Whether `path` exists in the volume directory.
    pub async fn has_file(&self, path: &str) -> bool {
        match files::resolve(&self.directory(), path) {
            Ok(target) => tokio::fs::try_exists(target).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    // ── Collections ──────────────────────────────────────────────

    pub async fn available_collections(&self) -> Vec<String> {
        self.collections.list_collections().await
    }

    pub async fn load_collection(&self, name: &str) -> Vec<String> {
        self.collections.load_collection(name).await
    }

    pub async fn collection_info(&self, name: &str, sub_path: &[String]) -> CollectionInfo {
        self.collections.collection_info(name, sub_path).await
    }

    // ── Files ────────────────────────────────────────────────────

    pub async fn copy_file(&self, path_in_volume: &str, source: &Path) -> VolumeResult<PathBuf> {
        files::copy_file(&self.directory(), path_in_volume, source).await
    }

    pub async fn write_file(
        &self,
        path_in_volume: &str,
        content: impl AsRef<[u8]>,
    ) -> VolumeResult<PathBuf> {
        files::write_file(&self.directory(), path_in_volume, content).await
    }

    pub async fn update_file(
        &self,
        path_in_volume: &str,
        content: impl AsRef<[u8]>,
    ) -> VolumeResult<PathBuf> {
        files::update_file(&self.directory(), path_in_volume, content).await
    }

    /// Moves the volume directory and renames the volume.
    pub async fn rename(&self, new_directory: &Path, new_name: &str) -> VolumeResult<()> {
        let old = self.directory();
        tokio::fs::rename(&old, new_directory)
            .await
            .map_err(|e| VolumeError::filesystem(&old, e))
            .inspect_err(|e| warn!("Renaming volume {} failed: {}", self.key, e))?;
        let mut place = write(&self.place);
        place.directory = new_directory.to_path_buf();
        place.name = new_name.to_string();
        info!("Volume {} moved to {}", self.key, new_directory.display());
        Ok(())
    }

    // ── Manifest ─────────────────────────────────────────────────

    fn manifest_store(&self) -> ManifestStore {
        let place = read(&self.place).clone();
        ManifestStore::new(
            place.directory,
            self.config.manifest_file.clone(),
            format!("{}://{}", self.config.url_scheme, self.key),
            place.name,
            self.log.clone(),
        )
    }

    /// Writes the manifest with `overrides` on top of `{url, title}`.
    pub async fn write_manifest(&self, overrides: Manifest) -> VolumeResult<Manifest> {
        self.manifest_store().write(overrides).await
    }

    /// Reads a manifest; empty when it cannot be read.
    pub async fn read_manifest(&self, path: Option<&str>) -> Manifest {
        self.manifest_store().read(path).await
    }

    /// Writes `doc` as the manifest verbatim.
    pub async fn update_manifest(&self, doc: &Manifest) -> VolumeResult<()> {
        self.manifest_store().update(doc).await
    }
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("key", &self.key)
            .field("directory", &self.directory())
            .field("writable", &self.log.writable())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read(place: &RwLock<Place>) -> std::sync::RwLockReadGuard<'_, Place> {
    place.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(place: &RwLock<Place>) -> std::sync::RwLockWriteGuard<'_, Place> {
    place.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
