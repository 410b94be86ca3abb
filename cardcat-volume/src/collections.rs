//! Collections stored inside a volume.
//!
//! A collection is a named, titled grouping of volume entries, possibly
//! nested. Collections are stored in the log under a conventional root
//! directory; how they are encoded is up to a [`CollectionProvider`].
//! [`CollectionIndex`] is what the volume exposes: it never fails, and
//! returns empty results when a collection cannot be read.

use crate::error::{VolumeError, VolumeResult};
use crate::log::ArchiveLog;
use crate::tree;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Title and description of a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub title: String,
    pub description: String,
}

/// An opened collection.
#[async_trait]
pub trait Collection: Send + Sync {
    /// Names of the collections directly inside this one.
    async fn list(&self) -> VolumeResult<Vec<String>>;

    /// Every item of this collection and its sub-collections.
    async fn flatten(&self) -> VolumeResult<Vec<String>>;

    /// Title of the sub-collection at `sub_path` (this one when empty).
    async fn title(&self, sub_path: &[String]) -> VolumeResult<String>;

    /// Description of the sub-collection at `sub_path`.
    async fn description(&self, sub_path: &[String]) -> VolumeResult<String>;
}

/// Opens collections out of a log.
#[async_trait]
pub trait CollectionProvider: Send + Sync {
    /// Opens the collection stored at `path` inside the log.
    async fn open(&self, log: Arc<dyn ArchiveLog>, path: &str) -> VolumeResult<Arc<dyn Collection>>;
}

/// The volume's view of its collections.
pub struct CollectionIndex {
    provider: Arc<dyn CollectionProvider>,
    log: Arc<dyn ArchiveLog>,
    root: String,
    cached: RwLock<Option<Arc<dyn Collection>>>,
}

impl CollectionIndex {
    pub fn new(
        provider: Arc<dyn CollectionProvider>,
        log: Arc<dyn ArchiveLog>,
        root: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            log,
            root: root.into(),
            cached: RwLock::new(None),
        }
    }

    /// Names of the top-level collections, or nothing if the index cannot
    /// be read. The opened index is kept for the life of the volume.
    pub async fn list_collections(&self) -> Vec<String> {
        match self.index().await {
            Ok(index) => index.list().await.unwrap_or_else(|e| {
                warn!("Listing collections failed: {}", e);
                Vec::new()
            }),
            Err(e) => {
                debug!("No collection index at {}: {}", self.root, e);
                Vec::new()
            }
        }
    }

    /// Every item of the named collection, or nothing on failure.
    pub async fn load_collection(&self, name: &str) -> Vec<String> {
        let opened = self.provider.open(self.log.clone(), &self.path_of(name)).await;
        let items = match opened {
            Ok(collection) => collection.flatten().await,
            Err(e) => Err(e),
        };
        items.unwrap_or_else(|e| {
            warn!("Loading collection {} failed: {}", name, e);
            Vec::new()
        })
    }

    /// Title and description of a (sub-)collection; empty on failure.
    pub async fn collection_info(&self, name: &str, sub_path: &[String]) -> CollectionInfo {
        let info = async {
            let collection = self.provider.open(self.log.clone(), &self.path_of(name)).await?;
            Ok::<_, VolumeError>(CollectionInfo {
                title: collection.title(sub_path).await?,
                description: collection.description(sub_path).await?,
            })
        };
        info.await.unwrap_or_else(|e| {
            warn!("Reading info of collection {} failed: {}", name, e);
            CollectionInfo::default()
        })
    }

    async fn index(&self) -> VolumeResult<Arc<dyn Collection>> {
        if let Some(index) = self.cached.read().await.as_ref() {
            return Ok(index.clone());
        }
        let mut cached = self.cached.write().await;
        if let Some(index) = cached.as_ref() {
            return Ok(index.clone());
        }
        let index = self.provider.open(self.log.clone(), &self.root).await?;
        *cached = Some(index.clone());
        Ok(index)
    }

    fn path_of(&self, name: &str) -> String {
        format!("{}/{}", self.root.trim_end_matches('/'), name.trim_start_matches('/'))
    }
}

// ── JSON collections ─────────────────────────────────────────────

/// A collection document as stored in the log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDocument {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionDocument>,
}

impl CollectionDocument {
    fn descend(&self, sub_path: &[String]) -> VolumeResult<&Self> {
        sub_path.iter().try_fold(self, |doc, name| {
            doc.collections
                .get(name)
                .ok_or_else(|| VolumeError::Collection(format!("no sub-collection {name}")))
        })
    }

    fn flatten_into(&self, out: &mut Vec<String>) {
        out.extend(self.items.iter().cloned());
        for child in self.collections.values() {
            child.flatten_into(out);
        }
    }
}

/// Reads collections stored as JSON files.
///
/// `<path>.json` in the log is a single [`CollectionDocument`]. A directory
/// `<path>/` holding `*.json` files is an index whose collections are those
/// files; an opened index lists the directory as it is at call time.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCollectionProvider;

enum JsonCollection {
    Index { log: Arc<dyn ArchiveLog>, base: String },
    Document(CollectionDocument),
}

/// Names of the `*.json` files directly inside `base`.
async fn index_names(log: &dyn ArchiveLog, base: &str) -> VolumeResult<Vec<String>> {
    let prefix = format!("{base}/");
    let files = tree::replay(log).await?;
    Ok(files
        .keys()
        .filter_map(|p| p.strip_prefix(&prefix))
        .filter(|rest| !rest.contains('/'))
        .filter_map(|rest| rest.strip_suffix(".json"))
        .map(str::to_string)
        .collect())
}

#[async_trait]
impl CollectionProvider for JsonCollectionProvider {
    async fn open(&self, log: Arc<dyn ArchiveLog>, path: &str) -> VolumeResult<Arc<dyn Collection>> {
        let base = format!("/{}", path.trim_matches('/'));
        let files = tree::replay(&*log).await?;

        let document = format!("{base}.json");
        if files.contains_key(&document) {
            let raw = log.read_file(&document).await?;
            let doc: CollectionDocument = serde_json::from_slice(&raw)
                .map_err(|e| VolumeError::Collection(format!("{document}: {e}")))?;
            return Ok(Arc::new(JsonCollection::Document(doc)));
        }

        if index_names(&*log, &base).await?.is_empty() {
            return Err(VolumeError::Collection(format!("no collection at {base}")));
        }
        Ok(Arc::new(JsonCollection::Index { log, base }))
    }
}

#[async_trait]
impl Collection for JsonCollection {
    async fn list(&self) -> VolumeResult<Vec<String>> {
        match self {
            Self::Index { log, base } => index_names(&**log, base).await,
            Self::Document(doc) => Ok(doc.collections.keys().cloned().collect()),
        }
    }

    async fn flatten(&self) -> VolumeResult<Vec<String>> {
        match self {
            Self::Index { .. } => Ok(Vec::new()),
            Self::Document(doc) => {
                let mut items = Vec::new();
                doc.flatten_into(&mut items);
                Ok(items)
            }
        }
    }

    async fn title(&self, sub_path: &[String]) -> VolumeResult<String> {
        match self {
            Self::Index { .. } => Ok(String::new()),
            Self::Document(doc) => Ok(doc.descend(sub_path)?.title.clone()),
        }
    }

    async fn description(&self, sub_path: &[String]) -> VolumeResult<String> {
        match self {
            Self::Index { .. } => Ok(String::new()),
            Self::Document(doc) => Ok(doc.descend(sub_path)?.description.clone()),
        }
    }
}
