//! Error types for the queue-driven RAG pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Broker could not be reached at startup
    #[error("Could not connect to message broker at '{host}': {message}")]
    BrokerUnavailable { host: String, message: String },

    /// Broker operation failed (declare, publish, consume, ack)
    #[error("Broker error: {0}")]
    Broker(String),

    /// Consumer stream ended because the connection went away
    #[error("Broker connection closed while consuming '{0}'")]
    ConnectionClosed(String),

    /// Message body could not be interpreted
    #[error("Malformed message on '{queue}': {message}")]
    MalformedMessage { queue: String, message: String },

    /// Embedding error
    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    /// Embedding or stored vector has the wrong dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Vector store transport or server error
    #[error("Vector database error: {0}")]
    VectorDb(String),

    /// The named collection does not exist
    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),

    /// A collaborator answered with a payload of unexpected shape
    #[error("Unexpected response from {service}: {message}")]
    Contract { service: String, message: String },

    /// Generation endpoint is not reachable
    #[error("Could not connect to the LLM server at {0}. Ensure it is running and the model is downloaded")]
    LlmUnavailable(String),

    /// Generation request failed (status or transport)
    #[error("LLM request failed: {0}")]
    Llm(String),

    /// Generation response carried no usable text
    #[error("LLM response was empty. Response: {body}")]
    EmptyResponse { body: String },

    /// Ingestion input is inconsistent
    #[error("Ingestion error: {0}")]
    Ingestion(String),

    /// Result sink could not be written
    #[error("Result sink error: {0}")]
    Sink(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a broker error
    pub fn broker(message: impl Into<String>) -> Self {
        Self::Broker(message.into())
    }

    /// Create a malformed message error
    pub fn malformed(queue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedMessage {
            queue: queue.into(),
            message: message.into(),
        }
    }

    /// Create an embedding error
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    /// Create a vector db error
    pub fn vector_db(message: impl Into<String>) -> Self {
        Self::VectorDb(message.into())
    }

    /// Create a contract violation error
    pub fn contract(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Contract {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create an LLM error
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Errors that must stop a consuming stage.
    ///
    /// A fatal error ends the consumption loop; under ack-after-success the
    /// in-flight message is requeued so a restarted stage sees it again.
    /// Everything else is logged and the message is dropped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::BrokerUnavailable { .. }
                | Error::Broker(_)
                | Error::ConnectionClosed(_)
                | Error::LlmUnavailable(_)
                | Error::Llm(_)
                | Error::EmptyResponse { .. }
                | Error::Sink(_)
        )
    }

    /// Collaborator answered, but not in the agreed shape
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::Contract { .. } | Error::Json(_))
    }
}

impl From<lapin::Error> for Error {
    fn from(err: lapin::Error) -> Self {
        Error::Broker(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Error::Config(_) => (StatusCode::BAD_REQUEST, "config_error"),
            Error::MalformedMessage { .. } | Error::Json(_) => {
                (StatusCode::BAD_REQUEST, "malformed_request")
            }
            Error::BrokerUnavailable { .. } | Error::Broker(_) | Error::ConnectionClosed(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "broker_error")
            }
            Error::LlmUnavailable(_) | Error::Llm(_) | Error::EmptyResponse { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "llm_error")
            }
            Error::Http(_) | Error::Contract { .. } => (StatusCode::BAD_GATEWAY, "upstream_error"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_failures_are_fatal() {
        assert!(Error::LlmUnavailable("http://localhost:11434".into()).is_fatal());
        assert!(Error::llm("HTTP 500").is_fatal());
        assert!(Error::EmptyResponse { body: "{}".into() }.is_fatal());
        assert!(Error::broker("publish nacked").is_fatal());
    }

    #[test]
    fn test_bad_input_is_not_fatal() {
        assert!(!Error::malformed("rag_core_queue", "invalid utf-8").is_fatal());
        assert!(!Error::CollectionNotFound("document_embeddings".into()).is_fatal());
        assert!(!Error::contract("chroma", "missing documents").is_fatal());
    }

    #[test]
    fn test_contract_violation_classification() {
        assert!(Error::contract("chroma", "documents is not a list").is_contract_violation());
        assert!(!Error::vector_db("connection refused").is_contract_violation());
    }
}
