//! Grounded prompt template

use crate::providers::ScoredDocument;

/// Context used when retrieval produced nothing
pub const NO_DOCUMENTS_CONTEXT: &str = "No relevant documents found in the knowledge base.";

/// Prompt builder for RAG queries
pub struct PromptBuilder;

impl PromptBuilder {
    /// Join retrieved chunk texts with a single space, or the sentinel when empty
    pub fn build_context(results: &[ScoredDocument]) -> String {
        if results.is_empty() {
            return NO_DOCUMENTS_CONTEXT.to_string();
        }

        results
            .iter()
            .map(|r| r.document.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Build the full prompt that restricts the model to the given context
    pub fn build_rag_prompt(query: &str, context: &str) -> String {
        format!(
            "Given the following context, please answer the question. \
             If the answer is not present in the context, please state that and do not try to make up an answer.\n\
             \n\
             Context:\n\
             {context}\n\
             \n\
             Question:\n\
             {query}\n"
        )
    }

    /// Extract the Context section from a prompt built by [`Self::build_rag_prompt`]
    pub fn context_of(prompt: &str) -> Option<&str> {
        let start = prompt.find("Context:\n")? + "Context:\n".len();
        let end = prompt[start..].find("\n\nQuestion:\n")? + start;
        Some(&prompt[start..end])
    }
}
