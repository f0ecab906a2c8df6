//! Ingestion pipeline orchestration

use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::providers::vector_store::validate_batch;
use crate::providers::{EmbeddingProvider, VectorStoreProvider};

use super::chunker::FixedSizeChunker;

/// Entries sent per upsert request
const UPSERT_BATCH: usize = 256;

/// File extensions picked up when walking a directory
const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];

/// Outcome of one ingestion run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    /// Collection written to
    pub collection: String,
    /// Source files read
    pub files: usize,
    /// Chunks stored
    pub chunks: usize,
}

/// Chunks documents, embeds the chunks and writes them to the vector store
pub struct IngestPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStoreProvider>,
    chunker: FixedSizeChunker,
    collection: String,
}

impl IngestPipeline {
    /// Create a new ingestion pipeline
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStoreProvider>,
        chunker: FixedSizeChunker,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            store,
            chunker,
            collection: collection.into(),
        }
    }

    /// Pipeline over the configured chunking and collection
    pub fn from_config(
        config: &RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStoreProvider>,
    ) -> Result<Self> {
        let chunker = FixedSizeChunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap)?;
        Ok(Self::new(embedder, store, chunker, config.vector_db.collection.clone()))
    }

    /// Store precomputed chunk/embedding pairs under ids `doc_0..doc_{N-1}`
    pub async fn ingest_pairs(&self, chunks: &[String], embeddings: &[Vec<f32>]) -> Result<IngestReport> {
        if chunks.len() != embeddings.len() {
            return Err(Error::Ingestion(format!(
                "the number of chunks ({}) and embeddings ({}) do not match",
                chunks.len(),
                embeddings.len()
            )));
        }

        let dimension = self.embedder.dimensions();
        let ids: Vec<String> = (0..chunks.len()).map(|i| format!("doc_{}", i)).collect();
        validate_batch(&ids, embeddings, chunks, Some(dimension))?;

        let info = self
            .store
            .get_or_create_collection(&self.collection, dimension)
            .await?;
        if let Some(stored) = info.dimension.filter(|d| *d != dimension) {
            return Err(Error::DimensionMismatch {
                expected: stored,
                actual: dimension,
            });
        }

        for start in (0..ids.len()).step_by(UPSERT_BATCH) {
            let end = (start + UPSERT_BATCH).min(ids.len());
            self.store
                .upsert(&self.collection, &ids[start..end], &embeddings[start..end], &chunks[start..end])
                .await?;
            tracing::debug!(collection = %self.collection, start, end, "Upserted batch");
        }

        tracing::info!(
            collection = %self.collection,
            chunks = chunks.len(),
            store = self.store.name(),
            "Ingested documents"
        );

        Ok(IngestReport {
            collection: self.collection.clone(),
            files: 0,
            chunks: chunks.len(),
        })
    }

    /// Chunk and embed raw texts, then store them
    pub async fn ingest_texts(&self, texts: &[String]) -> Result<IngestReport> {
        let chunks: Vec<String> = texts.iter().flat_map(|t| self.chunker.chunk(t)).collect();
        if chunks.is_empty() {
            return Err(Error::Ingestion("no text to ingest".into()));
        }

        tracing::info!(chunks = chunks.len(), embedder = self.embedder.name(), "Embedding chunks");
        let embeddings = self.embedder.embed_batch(&chunks).await?;
        self.ingest_pairs(&chunks, &embeddings).await
    }

    /// Ingest a `.txt`/`.md` file, or every such file below a directory
    pub async fn ingest_path(&self, path: &Path) -> Result<IngestReport> {
        let files = collect_text_files(path)?;
        if files.is_empty() {
            return Err(Error::Ingestion(format!(
                "no .txt or .md files found at {}",
                path.display()
            )));
        }

        let mut texts = Vec::with_capacity(files.len());
        for file in &files {
            tracing::info!(path = %file.display(), "Reading document");
            texts.push(tokio::fs::read_to_string(file).await?);
        }

        let report = self.ingest_texts(&texts).await?;
        Ok(IngestReport {
            files: files.len(),
            ..report
        })
    }
}

/// Text files at `path`, sorted so chunk ids are stable across runs
fn collect_text_files(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        return Err(Error::Ingestion(format!("{} does not exist", path.display())));
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
                .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
        })
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::embedding::MockEmbeddingProvider;
    use crate::providers::LocalVectorStore;
    use tempfile::TempDir;

    const COLLECTION: &str = "document_embeddings";

    /// Deterministic 3-d embedding from text length and first byte
    fn fake_embedding(text: &str) -> Vec<f32> {
        let first = text.bytes().next().unwrap_or(0) as f32;
        vec![text.len() as f32, first, 1.0]
    }

    fn embedder() -> MockEmbeddingProvider {
        let mut embedder = MockEmbeddingProvider::new();
        embedder.expect_dimensions().return_const(3usize);
        embedder.expect_name().return_const("mock");
        embedder
            .expect_embed_batch()
            .returning(|texts| Ok(texts.iter().map(|t| fake_embedding(t)).collect()));
        embedder
    }

    fn pipeline(dir: &TempDir, chunker: FixedSizeChunker) -> (IngestPipeline, Arc<LocalVectorStore>) {
        let store = Arc::new(LocalVectorStore::new(&dir.path().join("store")).unwrap());
        let pipeline = IngestPipeline::new(Arc::new(embedder()), store.clone(), chunker, COLLECTION);
        (pipeline, store)
    }

    #[tokio::test]
    async fn test_pairs_stored_with_sequential_ids() {
        let dir = TempDir::new().unwrap();
        let (pipeline, store) = pipeline(&dir, FixedSizeChunker::default());

        let chunks: Vec<String> = vec!["alpha".into(), "beta".into(), "gamma".into()];
        let embeddings = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]];
        let report = pipeline.ingest_pairs(&chunks, &embeddings).await.unwrap();

        assert_eq!(report.chunks, 3);
        assert_eq!(store.count(COLLECTION).await.unwrap(), 3);
        for (i, embedding) in embeddings.iter().enumerate() {
            let results = store.query(COLLECTION, embedding, 3).await.unwrap();
            assert_eq!(results[0].id, format!("doc_{}", i));
            assert_eq!(results[0].document, chunks[i]);
        }
    }

    #[tokio::test]
    async fn test_unequal_lengths_rejected() {
        let dir = TempDir::new().unwrap();
        let (pipeline, store) = pipeline(&dir, FixedSizeChunker::default());

        let err = pipeline
            .ingest_pairs(&["a".into(), "b".into()], &[vec![1.0, 0.0, 0.0]])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Ingestion(_)));
        assert_eq!(store.get_collection(COLLECTION).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wrong_dimension_rejected() {
        let dir = TempDir::new().unwrap();
        let (pipeline, _) = pipeline(&dir, FixedSizeChunker::default());

        assert!(matches!(
            pipeline.ingest_pairs(&["a".into()], &[vec![1.0; 384]]).await,
            Err(Error::DimensionMismatch {
                expected: 3,
                actual: 384
            })
        ));
    }

    #[tokio::test]
    async fn test_ingest_path_walks_text_files() {
        let dir = TempDir::new().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(docs.join("nested")).unwrap();
        std::fs::write(docs.join("a.txt"), "Refunds are issued within 30 days.").unwrap();
        std::fs::write(docs.join("nested").join("b.md"), "# Shipping\n\nFree over $50.").unwrap();
        std::fs::write(docs.join("c.pdf"), "binary").unwrap();

        let (pipeline, store) = pipeline(&dir, FixedSizeChunker::new(20, 5).unwrap());
        let report = pipeline.ingest_path(&docs).await.unwrap();

        assert_eq!(report.files, 2);
        // 34 chars -> 3 windows, 25 chars -> 2 windows
        assert_eq!(report.chunks, 5);
        assert_eq!(store.count(COLLECTION).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_ingest_path_without_text_files() {
        let dir = TempDir::new().unwrap();
        let (pipeline, _) = pipeline(&dir, FixedSizeChunker::default());
        std::fs::write(dir.path().join("notes.pdf"), "x").unwrap();

        assert!(matches!(
            pipeline.ingest_path(&dir.path().join("notes.pdf")).await,
            Err(Error::Ingestion(_))
        ));
    }
}
