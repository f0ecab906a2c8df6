//! LLM provider trait for answer generation

use async_trait::async_trait;
use crate::error::Result;

/// Trait for complete (non-streaming) text generation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a full response to `prompt` with `model`
    async fn generate(&self, prompt: &str, model: &str) -> Result<String>;

    /// Model configured for this deployment
    fn model(&self) -> String;

    /// Check if the provider is healthy and available
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &'static str;
}
