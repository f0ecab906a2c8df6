//! Similarity search over the corpus and grounded prompt assembly

use std::sync::Arc;

use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::generation::PromptBuilder;
use crate::providers::{EmbeddingProvider, ScoredDocument, VectorStoreProvider};

/// Turns a redacted query into a prompt grounded in the top matching chunks
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStoreProvider>,
    collection: String,
    top_k: usize,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStoreProvider>,
        collection: impl Into<String>,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            collection: collection.into(),
            top_k,
        }
    }

    /// Retriever over the configured collection
    pub fn from_config(
        config: &RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStoreProvider>,
    ) -> Self {
        Self::new(embedder, store, config.vector_db.collection.clone(), config.vector_db.top_k)
    }

    /// Embedding provider used for queries
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Vector store searched
    pub fn store(&self) -> &Arc<dyn VectorStoreProvider> {
        &self.store
    }

    /// Top-k chunks for `query`, most similar first.
    ///
    /// A missing collection or a malformed store response yields no results
    /// instead of an error.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<ScoredDocument>> {
        let Some(info) = self.store.get_collection(&self.collection).await? else {
            tracing::info!(collection = %self.collection, "Collection does not exist, no context available");
            return Ok(Vec::new());
        };

        if let Some(stored) = info.dimension {
            if stored != self.embedder.dimensions() {
                return Err(Error::DimensionMismatch {
                    expected: stored,
                    actual: self.embedder.dimensions(),
                });
            }
        }

        let embedding = self.embedder.embed(query).await?;

        match self.store.query(&self.collection, &embedding, self.top_k).await {
            Ok(results) => {
                tracing::debug!(
                    collection = %self.collection,
                    results = results.len(),
                    top_score = results.first().map(|r| r.score),
                    "Vector search complete"
                );
                Ok(results)
            }
            Err(Error::CollectionNotFound(name)) => {
                tracing::info!(collection = %name, "Collection disappeared before query");
                Ok(Vec::new())
            }
            Err(e) if e.is_contract_violation() => {
                tracing::warn!(error = %e, "Unusable vector store response, treating as no results");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Retrieve and assemble the full prompt
    pub async fn build_prompt(&self, query: &str) -> Result<String> {
        let results = self.retrieve(query).await?;
        let context = PromptBuilder::build_context(&results);
        Ok(PromptBuilder::build_rag_prompt(query, &context))
    }

    /// Like [`Self::build_prompt`], but any error is logged and yields an empty prompt
    pub async fn prompt_or_empty(&self, query: &str) -> String {
        match self.build_prompt(query).await {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::error!(error = %e, "Retrieval failed, forwarding empty prompt");
                String::new()
            }
        }
    }
}
