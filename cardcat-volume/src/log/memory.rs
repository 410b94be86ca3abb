//! In-process log backend.
//!
//! `MemoryLog` keeps a volume's metadata and content blocks in memory and
//! lets the caller drive replication by hand: blocks are marked local and
//! announced on the feed one at a time, the way a peer connection would
//! deliver them. Tests and the CLI run volumes on top of it.

use super::{ArchiveLog, LogBackend, LogEvent, NetworkStats};
use crate::config::OpenOptions;
use crate::error::{VolumeError, VolumeResult};
use async_trait::async_trait;
use cardcat_types::{ArchiveKey, EntryStat, Header, Node, KEY_LEN};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::UNIX_EPOCH;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Size of one content block in bytes.
pub const CONTENT_BLOCK_SIZE: u64 = 64 * 1024;

const FEED_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct LogState {
    /// Metadata blocks by index; `None` means known but not yet local.
    metadata: Vec<Option<Vec<u8>>>,
    /// Content blocks by index; `None` means known but not yet local.
    content: Vec<Option<Vec<u8>>>,
    /// Metadata blocks a peer holds.
    remote_metadata: Vec<Vec<u8>>,
    /// Content blocks a peer holds.
    remote_content: Vec<Vec<u8>>,
    content_available: bool,
    /// Byte length as currently seen.
    byte_length: u64,
    /// Byte length a refresh reveals.
    remote_byte_length: u64,
    stats: NetworkStats,
    joined: bool,
    metadata_requested: bool,
    download_requests: Vec<Option<String>>,
    failing_reads: Vec<u64>,
    fail_join: bool,
    fail_close: bool,
    closed: bool,
}

/// A log held in memory.
#[derive(Debug)]
pub struct MemoryLog {
    key: ArchiveKey,
    writable: bool,
    state: Mutex<LogState>,
    events: broadcast::Sender<LogEvent>,
}

impl MemoryLog {
    fn with_state(key: ArchiveKey, writable: bool, state: LogState) -> Self {
        let (events, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            key,
            writable,
            state: Mutex::new(state),
            events,
        }
    }

    /// Creates a new writable log holding only its header block.
    pub fn create(key: ArchiveKey) -> VolumeResult<Self> {
        let header = Header::archive(None).encode()?;
        Ok(Self::with_state(
            key,
            true,
            LogState {
                metadata: vec![Some(header)],
                content_available: true,
                ..Default::default()
            },
        ))
    }

    /// Creates a read-only replica of `key` that has nothing local yet.
    pub fn remote(key: ArchiveKey) -> Self {
        Self::with_state(key, false, LogState::default())
    }

    /// Creates a read-only replica of `source` whose blocks are all known
    /// but none local. The content log is not available until
    /// [`announce_content`](Self::announce_content).
    pub fn replica_of(source: &MemoryLog) -> Self {
        let src = source.state();
        let state = LogState {
            metadata: vec![None; src.metadata.len()],
            content: vec![None; src.content.len()],
            remote_metadata: src.metadata.iter().map(|b| b.clone().unwrap_or_default()).collect(),
            remote_content: src.content.iter().map(|b| b.clone().unwrap_or_default()).collect(),
            remote_byte_length: src.byte_length,
            ..Default::default()
        };
        Self::with_state(source.key, false, state)
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: LogEvent) {
        // No receivers is fine; nobody is listening yet.
        let _ = self.events.send(event);
    }

    // ── Replication controls ─────────────────────────────────────

    /// Declares the metadata blocks a peer holds without making them local.
    pub fn set_remote_metadata(&self, blocks: Vec<Vec<u8>>) {
        let mut state = self.state();
        state.metadata.resize(blocks.len(), None);
        state.remote_metadata = blocks;
    }

    /// Makes metadata block `index` local without announcing it.
    pub fn preload_metadata(&self, index: u64) -> bool {
        self.fill_metadata(index).is_some()
    }

    /// Makes metadata block `index` local and announces it on the feed.
    pub fn deliver_metadata(&self, index: u64) -> bool {
        match self.fill_metadata(index) {
            Some(data) => {
                self.emit(LogEvent::MetadataBlock { index, data });
                true
            }
            None => false,
        }
    }

    fn fill_metadata(&self, index: u64) -> Option<Vec<u8>> {
        let mut state = self.state();
        let data = state.remote_metadata.get(index as usize)?.clone();
        let slot = state.metadata.get_mut(index as usize)?;
        *slot = Some(data.clone());
        Some(data)
    }

    /// Announces that metadata is fully synced.
    pub fn announce_synced(&self) {
        self.emit(LogEvent::MetadataSynced);
    }

    /// Makes the content log available and announces it.
    pub fn announce_content(&self) {
        self.state().content_available = true;
        self.emit(LogEvent::ContentReady);
    }

    /// Declares the content blocks a peer holds without making them local.
    pub fn set_remote_content(&self, blocks: Vec<Vec<u8>>) {
        let mut state = self.state();
        state.remote_byte_length = blocks.iter().map(|b| b.len() as u64).sum();
        state.content.resize(blocks.len(), None);
        state.remote_content = blocks;
    }

    /// Makes content block `index` local and announces it on the feed.
    pub fn deliver_content(&self, index: u64) -> bool {
        {
            let mut state = self.state();
            let Some(data) = state.remote_content.get(index as usize).cloned() else {
                return false;
            };
            let Some(slot) = state.content.get_mut(index as usize) else {
                return false;
            };
            *slot = Some(data);
        }
        self.emit(LogEvent::ContentBlock { index });
        true
    }

    /// Records a peer connection with the given figures and announces it.
    pub fn connect_peer(&self, stats: NetworkStats) {
        self.state().stats = stats;
        self.emit(LogEvent::PeerConnected);
    }

    /// Makes reads of metadata block `index` fail.
    pub fn fail_reads_at(&self, index: u64) {
        self.state().failing_reads.push(index);
    }

    /// Makes the next network join fail.
    pub fn fail_join(&self) {
        self.state().fail_join = true;
    }

    /// Makes the next close fail.
    pub fn fail_close(&self) {
        self.state().fail_close = true;
    }

    // ── Inspection ───────────────────────────────────────────────

    /// Raw metadata blocks that are local, in index order. Missing blocks
    /// are skipped.
    pub fn local_metadata(&self) -> Vec<Vec<u8>> {
        self.state().metadata.iter().flatten().cloned().collect()
    }

    /// Raw content blocks that are local, in index order.
    pub fn local_content(&self) -> Vec<Vec<u8>> {
        self.state().content.iter().flatten().cloned().collect()
    }

    /// Content download requests seen so far.
    pub fn download_requests(&self) -> Vec<Option<String>> {
        self.state().download_requests.clone()
    }

    /// Whether the log joined the network.
    pub fn joined(&self) -> bool {
        self.state().joined
    }

    /// Whether a full metadata download was requested.
    pub fn metadata_requested(&self) -> bool {
        self.state().metadata_requested
    }

    /// Whether the log was closed.
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn append_node(&self, node: &Node) -> VolumeResult<u64> {
        let data = node.encode()?;
        let mut state = self.state();
        state.metadata.push(Some(data));
        Ok(state.metadata.len() as u64 - 1)
    }

    /// Newest node for `path`, scanning backwards over local blocks.
    fn find_node(&self, path: &str) -> VolumeResult<Option<Node>> {
        let state = self.state();
        for block in state.metadata.iter().skip(1).rev().flatten() {
            let node = Node::decode(block)?;
            if node.path == path {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }

    fn ensure_open(&self) -> VolumeResult<()> {
        if self.state().closed {
            return Err(VolumeError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl ArchiveLog for MemoryLog {
    fn key(&self) -> ArchiveKey {
        self.key
    }

    fn writable(&self) -> bool {
        self.writable
    }

    fn version(&self) -> u64 {
        (self.state().metadata.len() as u64).saturating_sub(1)
    }

    fn metadata_has(&self, index: u64) -> bool {
        self.state()
            .metadata
            .get(index as usize)
            .is_some_and(Option::is_some)
    }

    fn metadata_downloaded(&self) -> u64 {
        self.state().metadata.iter().filter(|b| b.is_some()).count() as u64
    }

    async fn metadata_get(&self, index: u64) -> VolumeResult<Vec<u8>> {
        self.ensure_open()?;
        let state = self.state();
        if state.failing_reads.contains(&index) {
            return Err(VolumeError::Log(format!("read of metadata block {index} failed")));
        }
        state
            .metadata
            .get(index as usize)
            .cloned()
            .flatten()
            .ok_or_else(|| VolumeError::Log(format!("metadata block {index} is not local")))
    }

    async fn download_metadata(&self) -> VolumeResult<()> {
        self.ensure_open()?;
        self.state().metadata_requested = true;
        Ok(())
    }

    fn content_available(&self) -> bool {
        self.state().content_available
    }

    fn content_has(&self, index: u64) -> bool {
        self.state()
            .content
            .get(index as usize)
            .is_some_and(Option::is_some)
    }

    fn content_downloaded(&self, start: u64, end: u64) -> u64 {
        let state = self.state();
        (start..end)
            .filter(|i| state.content.get(*i as usize).is_some_and(Option::is_some))
            .count() as u64
    }

    fn content_byte_length(&self) -> u64 {
        self.state().byte_length
    }

    async fn refresh_content_length(&self) -> VolumeResult<()> {
        self.ensure_open()?;
        let mut state = self.state();
        state.byte_length = state.byte_length.max(state.remote_byte_length);
        Ok(())
    }

    async fn download(&self, path: Option<&str>) -> VolumeResult<()> {
        self.ensure_open()?;
        self.state().download_requests.push(path.map(str::to_string));
        Ok(())
    }

    async fn read_file(&self, path: &str) -> VolumeResult<Vec<u8>> {
        self.ensure_open()?;
        let path = normalize(path);
        let stat = self
            .find_node(&path)?
            .and_then(|node| node.value)
            .ok_or_else(|| VolumeError::Log(format!("no such file: {path}")))?;

        let blocks = match stat.block_range() {
            Some((start, end)) => start..=end,
            None if stat.blocks == 0 => 1..=0,
            None => {
                return Err(VolumeError::Log(format!("{path} has an invalid block range")));
            }
        };
        let state = self.state();
        let mut data = Vec::with_capacity(stat.size as usize);
        for index in blocks {
            let block = state
                .content
                .get(index as usize)
                .and_then(Option::as_ref)
                .ok_or_else(|| {
                    VolumeError::Log(format!("content block {index} of {path} is not local"))
                })?;
            data.extend_from_slice(block);
        }
        data.truncate(stat.size as usize);
        Ok(data)
    }

    async fn put_file(&self, path: &str, source: &Path) -> VolumeResult<EntryStat> {
        self.ensure_open()?;
        if !self.writable {
            return Err(VolumeError::Log("log is not writable".to_string()));
        }
        let data = tokio::fs::read(source)
            .await
            .map_err(|e| VolumeError::filesystem(source, e))?;
        let meta = tokio::fs::metadata(source)
            .await
            .map_err(|e| VolumeError::filesystem(source, e))?;

        let stat = {
            let mut state = self.state();
            let offset = state.content.len() as u64;
            let byte_offset = state.byte_length;
            for chunk in data.chunks(CONTENT_BLOCK_SIZE as usize) {
                state.content.push(Some(chunk.to_vec()));
            }
            state.byte_length += data.len() as u64;
            state.remote_byte_length = state.byte_length;
            EntryStat {
                size: data.len() as u64,
                blocks: state.content.len() as u64 - offset,
                offset,
                byte_offset,
                mtime: unix_secs(meta.modified().ok()),
                ctime: unix_secs(meta.created().ok()),
            }
        };

        let path = normalize(path);
        let index = self.append_node(&Node {
            path: path.clone(),
            value: Some(stat.clone()),
        })?;
        debug!("Appended put {} at {}", path, index);
        Ok(stat)
    }

    async fn delete(&self, path: &str) -> VolumeResult<()> {
        self.ensure_open()?;
        if !self.writable {
            return Err(VolumeError::Log("log is not writable".to_string()));
        }
        let path = normalize(path);
        let index = self.append_node(&Node {
            path: path.clone(),
            value: None,
        })?;
        debug!("Appended del {} at {}", path, index);
        Ok(())
    }

    async fn join_network(&self) -> VolumeResult<()> {
        self.ensure_open()?;
        let mut state = self.state();
        if state.fail_join {
            state.fail_join = false;
            return Err(VolumeError::Log("no peers reachable".to_string()));
        }
        state.joined = true;
        info!("Joined network for {}", self.key);
        Ok(())
    }

    fn network_stats(&self) -> NetworkStats {
        self.state().stats
    }

    fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }

    async fn close(&self) -> VolumeResult<()> {
        let mut state = self.state();
        if state.fail_close {
            state.fail_close = false;
            return Err(VolumeError::Close("log refused to close".to_string()));
        }
        state.closed = true;
        Ok(())
    }
}

/// Hands out memory logs by directory (new volumes) or key (replicas).
#[derive(Debug, Default)]
pub struct MemoryBackend {
    by_directory: Mutex<HashMap<PathBuf, Arc<MemoryLog>>>,
    by_key: Mutex<HashMap<ArchiveKey, Arc<MemoryLog>>>,
    fail_open: bool,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend whose every open fails.
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Default::default()
        }
    }

    /// Registers a log so opening its key returns it.
    pub fn register(&self, log: Arc<MemoryLog>) {
        self.by_key
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(log.key(), log);
    }

    /// Returns the log opened for `directory`, if any.
    pub fn log_for(&self, directory: &Path) -> Option<Arc<MemoryLog>> {
        self.by_directory
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(directory)
            .cloned()
    }

    /// Derives the key a new volume at `directory` gets.
    pub fn key_for(directory: &Path) -> ArchiveKey {
        let digest = Sha256::digest(directory.to_string_lossy().as_bytes());
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&digest);
        ArchiveKey::from_bytes(bytes)
    }
}

#[async_trait]
impl LogBackend for MemoryBackend {
    async fn open_or_create(
        &self,
        directory: &Path,
        key: Option<ArchiveKey>,
        options: &OpenOptions,
    ) -> VolumeResult<Arc<dyn ArchiveLog>> {
        if self.fail_open {
            return Err(VolumeError::Open(format!(
                "backend refused to open {}",
                directory.display()
            )));
        }
        debug!("Opening {} with {:?}", directory.display(), options);

        let log = match key {
            Some(key) => {
                let mut by_key = self.by_key.lock().unwrap_or_else(|p| p.into_inner());
                by_key
                    .entry(key)
                    .or_insert_with(|| Arc::new(MemoryLog::remote(key)))
                    .clone()
            }
            None => {
                let mut by_dir = self.by_directory.lock().unwrap_or_else(|p| p.into_inner());
                match by_dir.get(directory) {
                    Some(log) => log.clone(),
                    None => {
                        let log = Arc::new(MemoryLog::create(Self::key_for(directory))?);
                        by_dir.insert(directory.to_path_buf(), log.clone());
                        log
                    }
                }
            }
        };
        if let Some(key) = key {
            self.by_directory
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .insert(directory.to_path_buf(), log.clone());
            debug!("Opened replica {}", key);
        }
        Ok(log)
    }
}

/// Normalizes a volume path to its `/`-rooted form.
fn normalize(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    format!("/{trimmed}")
}

fn unix_secs(time: Option<std::time::SystemTime>) -> Option<u64> {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
}
