//! queue-rag: retrieval-augmented generation as a chain of queue-connected stages
//!
//! Raw text is redacted for PII, turned into a prompt grounded in the nearest
//! corpus chunks, and answered by a local LLM. Stages hand messages to each
//! other through RabbitMQ (or an in-process broker), so each runs and restarts
//! independently.

pub mod config;
pub mod error;
pub mod generation;
pub mod ingestion;
pub mod logging;
pub mod pii;
pub mod processing;
pub mod providers;
pub mod queue;
pub mod retrieval;
pub mod server;

pub use config::RagConfig;
pub use error::{Error, Result};
pub use pii::PiiRedactor;
pub use queue::{Message, MessageBroker, MessageHandler};
