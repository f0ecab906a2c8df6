//! Generation stage: prompt in, answer to the result sink

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::generation::{Answer, AnswerSink};
use crate::providers::LlmProvider;
use crate::queue::{Message, MessageHandler};

use super::worker::Stage;

/// Terminal stage; publishes nothing further
pub struct LlmStage {
    llm: Arc<dyn LlmProvider>,
    sink: Arc<dyn AnswerSink>,
    model: String,
    input: String,
}

impl LlmStage {
    /// Generate with the provider's configured model
    pub fn new(llm: Arc<dyn LlmProvider>, sink: Arc<dyn AnswerSink>, input: impl Into<String>) -> Self {
        let model = llm.model();
        Self {
            llm,
            sink,
            model,
            input: input.into(),
        }
    }
}

#[async_trait]
impl MessageHandler for LlmStage {
    async fn handle(&self, message: &Message) -> Result<()> {
        let prompt = message.text()?;
        if prompt.trim().is_empty() {
            return Err(Error::malformed(&message.queue, "empty prompt"));
        }

        let answer = self.llm.generate(prompt, &self.model).await?;
        tracing::info!(model = %self.model, answer = %answer, "Generated answer");

        self.sink
            .write(&Answer::new(self.model.as_str(), prompt, answer))
            .await
    }
}

#[async_trait]
impl Stage for LlmStage {
    fn name(&self) -> &'static str {
        "llm"
    }

    fn input_queue(&self) -> &str {
        &self.input
    }

    async fn check_collaborators(&self) {
        match self.llm.health_check().await {
            Ok(true) => tracing::info!(provider = self.llm.name(), model = %self.model, "LLM server is reachable"),
            Ok(false) => tracing::warn!(provider = self.llm.name(), "LLM server is not reachable"),
            Err(e) => tracing::warn!(provider = self.llm.name(), error = %e, "LLM health check failed"),
        }
    }
}
