//! Vector store provider trait for storing and searching embeddings

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A named collection in the vector store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    /// Collection name
    pub name: String,
    /// Embedding dimension recorded at creation, if known
    pub dimension: Option<usize>,
}

/// A stored chunk returned by similarity search
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    /// Chunk id
    pub id: String,
    /// Chunk text
    pub document: String,
    /// Similarity score (higher is more similar)
    pub score: f32,
}

/// Trait for vector storage and similarity search
///
/// Implementations:
/// - `ChromaVectorStore`: ChromaDB server over HTTP
/// - `LocalVectorStore`: JSON files on local disk
///
/// A missing collection is reported as `Ok(None)` by [`get_collection`] and as
/// [`Error::CollectionNotFound`] by the other operations, never as a transport error.
///
/// [`get_collection`]: VectorStoreProvider::get_collection
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorStoreProvider: Send + Sync {
    /// Return the collection, creating it with `dimension` if absent
    async fn get_or_create_collection(&self, name: &str, dimension: usize) -> Result<CollectionInfo>;

    /// Look a collection up without creating it
    async fn get_collection(&self, name: &str) -> Result<Option<CollectionInfo>>;

    /// All collections in the store
    async fn list_collections(&self) -> Result<Vec<CollectionInfo>>;

    /// Insert or replace entries by id. The three slices are zipped by index.
    async fn upsert(
        &self,
        collection: &str,
        ids: &[String],
        embeddings: &[Vec<f32>],
        documents: &[String],
    ) -> Result<()>;

    /// Up to `top_k` entries nearest to `embedding`, most similar first
    async fn query(&self, collection: &str, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredDocument>>;

    /// Number of entries in the collection
    async fn count(&self, collection: &str) -> Result<usize>;

    /// Check if the provider is healthy
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &'static str;
}

/// Check that an upsert batch is consistent before sending it anywhere
pub fn validate_batch(
    ids: &[String],
    embeddings: &[Vec<f32>],
    documents: &[String],
    dimension: Option<usize>,
) -> Result<()> {
    if ids.len() != embeddings.len() || ids.len() != documents.len() {
        return Err(Error::Ingestion(format!(
            "batch length mismatch: {} ids, {} embeddings, {} documents",
            ids.len(),
            embeddings.len(),
            documents.len()
        )));
    }

    if let Some(expected) = dimension {
        if let Some(bad) = embeddings.iter().find(|e| e.len() != expected) {
            return Err(Error::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_validate_batch_lengths() {
        let ids = strings(&["doc_0", "doc_1"]);
        let docs = strings(&["a", "b"]);
        let embeddings = vec![vec![0.0; 3], vec![1.0; 3]];

        assert!(validate_batch(&ids, &embeddings, &docs, Some(3)).is_ok());
        assert!(matches!(
            validate_batch(&ids, &embeddings[..1], &docs, None),
            Err(Error::Ingestion(_))
        ));
    }

    #[test]
    fn test_validate_batch_dimension() {
        let ids = strings(&["doc_0"]);
        let docs = strings(&["a"]);
        let embeddings = vec![vec![0.0; 4]];

        assert!(matches!(
            validate_batch(&ids, &embeddings, &docs, Some(384)),
            Err(Error::DimensionMismatch {
                expected: 384,
                actual: 4
            })
        ));
    }
}
