//! Provider abstractions for the external collaborators
//!
//! The pipeline only depends on these traits; concrete backends are picked
//! from configuration at stage startup.

pub mod chroma;
pub mod embedding;
pub mod llm;
pub mod local;
pub mod ollama;
pub mod vector_store;

use std::sync::Arc;

use crate::config::{RagConfig, VectorBackend};
use crate::error::Result;

pub use chroma::ChromaVectorStore;
pub use embedding::EmbeddingProvider;
pub use llm::LlmProvider;
pub use local::LocalVectorStore;
pub use ollama::{OllamaEmbedder, OllamaLlm};
pub use vector_store::{CollectionInfo, ScoredDocument, VectorStoreProvider};

/// Vector store selected by `vector_db.backend`
pub fn vector_store_from_config(config: &RagConfig) -> Result<Arc<dyn VectorStoreProvider>> {
    match config.vector_db.backend {
        VectorBackend::Chroma => Ok(Arc::new(ChromaVectorStore::new(&config.vector_db)?)),
        VectorBackend::Local => Ok(Arc::new(LocalVectorStore::new(&config.vector_db.storage_path)?)),
    }
}
