//! Local vector store persisted as one JSON file per collection
//!
//! Search is a brute-force cosine scan, which is fine for the corpus sizes a
//! single-machine deployment handles. Collection files may be rewritten by
//! another process (an ingestion run next to a running retrieval stage), so
//! every operation first reloads files whose size or mtime changed.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{Error, Result};

use super::vector_store::{validate_batch, CollectionInfo, ScoredDocument, VectorStoreProvider};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    id: String,
    document: String,
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCollection {
    name: String,
    dimension: Option<usize>,
    entries: Vec<StoredEntry>,
}

impl StoredCollection {
    fn info(&self) -> CollectionInfo {
        CollectionInfo {
            name: self.name.clone(),
            dimension: self.dimension,
        }
    }

    /// Insert or replace entries by id, keeping first-insertion order
    fn merge(&mut self, ids: Vec<String>, embeddings: Vec<Vec<f32>>, documents: Vec<String>) {
        let mut position: HashMap<String, usize> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();

        for ((id, embedding), document) in ids.into_iter().zip(embeddings).zip(documents) {
            let entry = StoredEntry {
                id: id.clone(),
                document,
                embedding,
            };
            match position.get(&id) {
                Some(&i) => self.entries[i] = entry,
                None => {
                    position.insert(id, self.entries.len());
                    self.entries.push(entry);
                }
            }
        }
    }
}

/// What a collection file looked like when it was last read or written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl FileStamp {
    /// `None` when the file does not exist
    fn of(path: &Path) -> Result<Option<Self>> {
        match std::fs::metadata(path) {
            Ok(meta) => Ok(Some(Self {
                modified: meta.modified().ok(),
                len: meta.len(),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

struct Cached {
    collection: StoredCollection,
    stamp: Option<FileStamp>,
}

struct Inner {
    root: PathBuf,
    collections: RwLock<HashMap<String, Cached>>,
}

/// File-backed vector store
#[derive(Clone)]
pub struct LocalVectorStore {
    inner: Arc<Inner>,
}

impl LocalVectorStore {
    /// Open (or create) a store rooted at `root`, loading existing collections
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;

        let inner = Inner {
            root: root.to_path_buf(),
            collections: RwLock::new(HashMap::new()),
        };
        inner.refresh_all()?;

        tracing::info!(
            path = %root.display(),
            collections = inner.collections.read().len(),
            "Opened local vector store"
        );

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

impl Inner {
    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if !valid_name(name) {
            return Err(Error::vector_db(format!("invalid collection name '{}'", name)));
        }
        Ok(self.root.join(format!("{}.json", name)))
    }

    /// Bring one cached collection in line with its file
    fn refresh(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        let Some(stamp) = FileStamp::of(&path)? else {
            self.collections.write().remove(name);
            return Ok(());
        };

        let current = self.collections.read().get(name).and_then(|c| c.stamp);
        if current == Some(stamp) {
            return Ok(());
        }

        let raw = std::fs::read_to_string(&path)?;
        let collection: StoredCollection = serde_json::from_str(&raw).map_err(|e| {
            Error::vector_db(format!("corrupt collection file {}: {}", path.display(), e))
        })?;
        tracing::debug!(collection = name, entries = collection.entries.len(), "Loaded collection file");

        self.collections.write().insert(
            name.to_string(),
            Cached {
                collection,
                stamp: Some(stamp),
            },
        );
        Ok(())
    }

    /// Pick up collections created, changed or removed on disk
    fn refresh_all(&self) -> Result<()> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if valid_name(stem) && !names.iter().any(|n| n == stem) {
                    names.push(stem.to_string());
                }
            }
        }

        for name in &names {
            self.refresh(name)?;
        }
        Ok(())
    }

    /// Replace the collection file atomically and return its new stamp
    fn persist(&self, collection: &StoredCollection) -> Result<Option<FileStamp>> {
        let path = self.path_for(&collection.name)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(collection)?)?;
        std::fs::rename(&tmp, &path)?;
        FileStamp::of(&path)
    }
}

#[async_trait]
impl VectorStoreProvider for LocalVectorStore {
    async fn get_or_create_collection(&self, name: &str, dimension: usize) -> Result<CollectionInfo> {
        let name = name.to_string();
        self.blocking(move |inner| {
            inner.refresh(&name)?;
            let mut collections = inner.collections.write();
            if let Some(existing) = collections.get(&name) {
                return Ok(existing.collection.info());
            }

            let collection = StoredCollection {
                name: name.clone(),
                dimension: Some(dimension),
                entries: Vec::new(),
            };
            let stamp = inner.persist(&collection)?;
            let info = collection.info();
            collections.insert(name, Cached { collection, stamp });
            tracing::info!(collection = %info.name, dimension, "Created collection");
            Ok(info)
        })
        .await
    }

    async fn get_collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let name = name.to_string();
        self.blocking(move |inner| {
            inner.refresh(&name)?;
            Ok(inner
                .collections
                .read()
                .get(&name)
                .map(|c| c.collection.info()))
        })
        .await
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        self.blocking(|inner| {
            inner.refresh_all()?;
            let mut infos: Vec<_> = inner
                .collections
                .read()
                .values()
                .map(|c| c.collection.info())
                .collect();
            infos.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(infos)
        })
        .await
    }

    async fn upsert(
        &self,
        collection: &str,
        ids: &[String],
        embeddings: &[Vec<f32>],
        documents: &[String],
    ) -> Result<()> {
        let name = collection.to_string();
        let ids = ids.to_vec();
        let embeddings = embeddings.to_vec();
        let documents = documents.to_vec();

        self.blocking(move |inner| {
            inner.refresh(&name)?;
            let mut collections = inner.collections.write();
            let cached = collections
                .get(&name)
                .ok_or_else(|| Error::CollectionNotFound(name.clone()))?;
            validate_batch(&ids, &embeddings, &documents, cached.collection.dimension)?;

            // The cached copy changes only once the file write succeeded
            let mut updated = cached.collection.clone();
            updated.merge(ids, embeddings, documents);
            let stamp = inner.persist(&updated)?;
            collections.insert(
                name,
                Cached {
                    collection: updated,
                    stamp,
                },
            );
            Ok(())
        })
        .await
    }

    async fn query(&self, collection: &str, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredDocument>> {
        let name = collection.to_string();
        let query = embedding.to_vec();

        self.blocking(move |inner| {
            inner.refresh(&name)?;
            let collections = inner.collections.read();
            let stored = &collections
                .get(&name)
                .ok_or_else(|| Error::CollectionNotFound(name.clone()))?
                .collection;

            if let Some(expected) = stored.dimension {
                if query.len() != expected {
                    return Err(Error::DimensionMismatch {
                        expected,
                        actual: query.len(),
                    });
                }
            }

            let mut scored: Vec<ScoredDocument> = stored
                .entries
                .iter()
                .map(|e| ScoredDocument {
                    id: e.id.clone(),
                    document: e.document.clone(),
                    score: cosine_similarity(&query, &e.embedding),
                })
                .collect();
            scored.sort_by(|a, b| b.score.total_cmp(&a.score));
            scored.truncate(top_k);
            Ok(scored)
        })
        .await
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let name = collection.to_string();
        self.blocking(move |inner| {
            inner.refresh(&name)?;
            inner
                .collections
                .read()
                .get(&name)
                .map(|c| c.collection.entries.len())
                .ok_or_else(|| Error::CollectionNotFound(name.clone()))
        })
        .await
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.inner.root.is_dir())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
