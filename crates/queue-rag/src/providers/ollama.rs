//! Ollama-backed providers for embeddings and generation
//!
//! Wraps the shared OllamaClient to implement the provider traits.

use async_trait::async_trait;

use crate::config::{EmbeddingConfig, LlmConfig};
use crate::error::{Error, Result};
use crate::generation::OllamaClient;

use super::embedding::EmbeddingProvider;
use super::llm::LlmProvider;

/// Ollama embedding provider with a fixed model and dimension
pub struct OllamaEmbedder {
    client: OllamaClient,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    /// Create a new Ollama embedder
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: OllamaClient::for_embeddings(config)?,
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }

    /// Create from an existing client
    pub fn from_client(client: OllamaClient, model: String, dimensions: usize) -> Self {
        Self {
            client,
            model,
            dimensions,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = self.client.embed(&self.model, text).await?;
        if embedding.len() != self.dimensions {
            return Err(Error::DimensionMismatch {
                expected: self.dimensions,
                actual: embedding.len(),
            });
        }
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}

/// Ollama LLM provider
pub struct OllamaLlm {
    client: OllamaClient,
    model: String,
}

impl OllamaLlm {
    /// Create a new Ollama LLM provider
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: OllamaClient::for_generation(config)?,
            model: config.generate_model.clone(),
        })
    }

    /// Create from an existing client
    pub fn from_client(client: OllamaClient, model: String) -> Self {
        Self { client, model }
    }
}

#[async_trait]
impl LlmProvider for OllamaLlm {
    async fn generate(&self, prompt: &str, model: &str) -> Result<String> {
        self.client.generate(model, prompt).await
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_embedder_rejects_wrong_dimension() {
        let router = Router::new().route(
            "/api/embeddings",
            post(|| async { Json(json!({"embedding": [0.5, 0.5]})) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let client = OllamaClient::new(&format!("http://{}", addr), Duration::from_secs(5)).unwrap();
        let embedder = OllamaEmbedder::from_client(client, "all-minilm".into(), 384);

        assert!(matches!(
            embedder.embed("hello").await,
            Err(Error::DimensionMismatch {
                expected: 384,
                actual: 2
            })
        ));
    }
}
