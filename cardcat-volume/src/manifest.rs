//! Volume manifest.
//!
//! The manifest is a small JSON document at the volume root identifying the
//! volume: `{url, title, ...}`. It is always written whole.

use crate::error::{VolumeError, VolumeResult};
use crate::files;
use crate::log::ArchiveLog;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// A manifest document. Keys beyond `url` and `title` are kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Map<String, Value>);

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(&self) -> Option<&str> {
        self.0.get("url").and_then(Value::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.0.get("title").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Sets a field, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Manifest {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Reads and writes a volume's manifest.
pub struct ManifestStore {
    directory: PathBuf,
    file: String,
    url: String,
    title: String,
    log: Arc<dyn ArchiveLog>,
}

impl ManifestStore {
    /// Creates a store for the manifest at `file` under `directory`.
    pub fn new(
        directory: impl Into<PathBuf>,
        file: impl Into<String>,
        url: impl Into<String>,
        title: impl Into<String>,
        log: Arc<dyn ArchiveLog>,
    ) -> Self {
        Self {
            directory: directory.into(),
            file: file.into(),
            url: url.into(),
            title: title.into(),
            log,
        }
    }

    /// Writes `{url, title}` merged with `overrides`; fields in `overrides`
    /// win. Returns the written document.
    pub async fn write(&self, overrides: Manifest) -> VolumeResult<Manifest> {
        let mut doc = Manifest::new()
            .with("url", self.url.clone())
            .with("title", self.title.clone());
        for (key, value) in overrides.into_inner() {
            doc.insert(key, value);
        }
        self.update(&doc).await?;
        Ok(doc)
    }

    /// Reads the manifest at `path` (the default manifest file when `None`).
    /// The local copy wins over the log's. Any failure yields an empty
    /// manifest.
    pub async fn read(&self, path: Option<&str>) -> Manifest {
        let path = path.unwrap_or(&self.file);
        match self.try_read(path).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Manifest {} unreadable: {}", path, e);
                Manifest::new()
            }
        }
    }

    async fn try_read(&self, path: &str) -> VolumeResult<Manifest> {
        let local = files::resolve(&self.directory, path)?;
        let raw = match tokio::fs::read(&local).await {
            Ok(raw) => raw,
            Err(_) => {
                debug!("No local {}, reading from log", local.display());
                self.log
                    .read_file(path)
                    .await
                    .map_err(|e| VolumeError::ManifestRead(e.to_string()))?
            }
        };
        serde_json::from_slice(&raw).map_err(|e| VolumeError::ManifestRead(e.to_string()))
    }

    /// Writes `doc` verbatim.
    pub async fn update(&self, doc: &Manifest) -> VolumeResult<()> {
        let raw = serde_json::to_vec_pretty(doc)?;
        files::write_file(&self.directory, &self.file, raw).await?;
        Ok(())
    }
}
