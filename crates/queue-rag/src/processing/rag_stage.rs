//! Retrieval stage: redacted query in, grounded prompt out

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::QueueNames;
use crate::error::{Error, Result};
use crate::queue::{Message, MessageBroker, MessageHandler};
use crate::retrieval::Retriever;

use super::worker::Stage;

/// Consumes redacted queries, publishes assembled prompts
pub struct RagStage {
    broker: Arc<dyn MessageBroker>,
    retriever: Retriever,
    input: String,
    output: String,
}

impl RagStage {
    pub fn new(broker: Arc<dyn MessageBroker>, retriever: Retriever, queues: &QueueNames) -> Self {
        Self {
            broker,
            retriever,
            input: queues.rag_core.clone(),
            output: queues.llm.clone(),
        }
    }
}

#[async_trait]
impl MessageHandler for RagStage {
    async fn handle(&self, message: &Message) -> Result<()> {
        let query = message.text()?;
        if query.trim().is_empty() {
            return Err(Error::malformed(&message.queue, "empty query"));
        }
        tracing::info!(query, "Received query");

        // Retrieval failures degrade to an empty prompt, which is still forwarded
        let prompt = self.retriever.prompt_or_empty(query).await;

        self.broker.publish(&self.output, prompt.as_bytes()).await?;
        tracing::info!(queue = %self.output, prompt_chars = prompt.len(), "Forwarded prompt");
        Ok(())
    }
}

#[async_trait]
impl Stage for RagStage {
    fn name(&self) -> &'static str {
        "rag-core"
    }

    fn input_queue(&self) -> &str {
        &self.input
    }

    async fn check_collaborators(&self) {
        let embedder = self.retriever.embedder();
        match embedder.health_check().await {
            Ok(true) => tracing::info!(provider = embedder.name(), "Embedding provider is reachable"),
            Ok(false) => tracing::warn!(provider = embedder.name(), "Embedding provider is not reachable"),
            Err(e) => tracing::warn!(provider = embedder.name(), error = %e, "Embedding health check failed"),
        }

        let store = self.retriever.store();
        match store.health_check().await {
            Ok(true) => tracing::info!(provider = store.name(), "Vector store is reachable"),
            Ok(false) => tracing::warn!(provider = store.name(), "Vector store is not reachable"),
            Err(e) => tracing::warn!(provider = store.name(), error = %e, "Vector store health check failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AckMode;
    use crate::generation::{PromptBuilder, NO_DOCUMENTS_CONTEXT};
    use crate::providers::embedding::MockEmbeddingProvider;
    use crate::providers::{LocalVectorStore, VectorStoreProvider};
    use crate::queue::InMemoryBroker;
    use tempfile::TempDir;

    fn message(body: &str) -> Message {
        Message {
            queue: "rag_core_queue".into(),
            body: body.as_bytes().to_vec(),
            delivery_tag: 7,
            redelivered: false,
        }
    }

    #[tokio::test]
    async fn test_empty_corpus_prompt_carries_sentinel() {
        let dir = TempDir::new().unwrap();
        let broker = InMemoryBroker::new(AckMode::AfterSuccess);
        let retriever = Retriever::new(
            Arc::new(MockEmbeddingProvider::new()),
            Arc::new(LocalVectorStore::new(dir.path()).unwrap()),
            "document_embeddings",
            3,
        );
        let stage = RagStage::new(Arc::new(broker.clone()), retriever, &QueueNames::default());

        stage.handle(&message("What is the refund policy?")).await.unwrap();

        let bodies = broker.peek_bodies("llm_queue");
        assert_eq!(bodies.len(), 1);
        let prompt = String::from_utf8(bodies[0].clone()).unwrap();
        assert_eq!(PromptBuilder::context_of(&prompt), Some(NO_DOCUMENTS_CONTEXT));
        assert!(prompt.contains("Question:\nWhat is the refund policy?"));
    }

    #[tokio::test]
    async fn test_retrieval_error_forwards_empty_prompt() {
        let dir = TempDir::new().unwrap();
        let store = LocalVectorStore::new(dir.path()).unwrap();
        store.get_or_create_collection("document_embeddings", 3).await.unwrap();

        let mut embedder = MockEmbeddingProvider::new();
        embedder.expect_dimensions().return_const(3usize);
        embedder
            .expect_embed()
            .returning(|_| Err(Error::embedding("could not connect to http://localhost:11434")));

        let broker = InMemoryBroker::new(AckMode::AfterSuccess);
        let retriever = Retriever::new(Arc::new(embedder), Arc::new(store), "document_embeddings", 3);
        let stage = RagStage::new(Arc::new(broker.clone()), retriever, &QueueNames::default());

        stage.handle(&message("refunds?")).await.unwrap();
        assert_eq!(broker.peek_bodies("llm_queue"), vec![Vec::<u8>::new()]);
    }

    #[tokio::test]
    async fn test_blank_query_dropped() {
        let dir = TempDir::new().unwrap();
        let broker = InMemoryBroker::new(AckMode::AfterSuccess);
        let retriever = Retriever::new(
            Arc::new(MockEmbeddingProvider::new()),
            Arc::new(LocalVectorStore::new(dir.path()).unwrap()),
            "document_embeddings",
            3,
        );
        let stage = RagStage::new(Arc::new(broker.clone()), retriever, &QueueNames::default());

        let err = stage.handle(&message("  ")).await.unwrap_err();
        assert!(!err.is_fatal());
        assert!(broker.is_empty("llm_queue"));
    }
}
