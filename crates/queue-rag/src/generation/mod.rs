//! Answer generation: prompt assembly, the Ollama client and answer sinks

pub mod ollama;
pub mod prompt;
pub mod sink;

pub use ollama::OllamaClient;
pub use prompt::{PromptBuilder, NO_DOCUMENTS_CONTEXT};
pub use sink::{Answer, AnswerSink, JsonlFileSink, StdoutSink};
