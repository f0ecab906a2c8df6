//! Configuration for the RAG pipeline stages

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable naming a TOML config file
pub const CONFIG_ENV: &str = "QUEUE_RAG_CONFIG";

/// Main pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Message broker configuration
    pub broker: BrokerConfig,
    /// Embedding configuration
    pub embeddings: EmbeddingConfig,
    /// Vector database configuration
    pub vector_db: VectorDbConfig,
    /// Ollama/LLM configuration
    pub llm: LlmConfig,
    /// Chunking configuration
    pub chunking: ChunkingConfig,
    /// Intake server configuration
    pub server: ServerConfig,
    /// Where generated answers go
    pub sink: SinkConfig,
    /// Log output
    pub logging: LoggingConfig,
}

impl RagConfig {
    /// Read a TOML file; missing sections fall back to defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config '{}': {}", path.display(), e))
        })?;
        Ok(toml::from_str(&raw)?)
    }

    /// Load configuration: explicit path, then `QUEUE_RAG_CONFIG`, then defaults.
    /// Environment overrides are applied last and the result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("RABBITMQ_HOST") {
            self.broker.host = host;
        }
        if let Some(url) = lookup("AMQP_URL") {
            self.broker.url = Some(url);
        }
        if let Some(host) = lookup("CHROMA_HOST") {
            self.vector_db.host = host;
        }
        if let Some(port) = lookup("CHROMA_PORT").and_then(|p| p.parse().ok()) {
            self.vector_db.port = port;
        }
        if let Some(path) = lookup("VECTOR_DB_PATH") {
            self.vector_db.storage_path = PathBuf::from(path);
        }
        if let Some(url) = lookup("OLLAMA_BASE_URL") {
            self.llm.base_url = url.clone();
            self.embeddings.base_url = url;
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.generate_model = model;
        }
        if let Some(model) = lookup("EMBED_MODEL") {
            self.embeddings.model = model;
        }
    }

    /// Reject settings no stage can run with
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(Error::Config("chunking.chunk_size must be positive".into()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(Error::Config(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.embeddings.dimensions == 0 {
            return Err(Error::Config("embeddings.dimensions must be positive".into()));
        }
        if self.vector_db.top_k == 0 {
            return Err(Error::Config("vector_db.top_k must be positive".into()));
        }
        if self.sink.kind == SinkKind::File && self.sink.path.is_none() {
            return Err(Error::Config("sink.path is required when sink.kind = \"file\"".into()));
        }
        Ok(())
    }
}

/// Acknowledgment discipline for consumed messages
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Acknowledged on delivery; a failing handler loses the message.
    ///
    /// RabbitMQ ignores the prefetch limit for no-ack consumers, so every
    /// ready message is pushed into the client buffer at once.
    /// A fatal error or interrupt then loses all buffered messages, not only
    /// the one being handled.
    Auto,
    /// Acknowledged once the handler succeeded; fatal failures requeue
    #[default]
    AfterSuccess,
}

/// Queue names used between stages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueNames {
    /// Raw client text, consumed by the PII stage
    pub pii_input: String,
    /// Redacted text, consumed by the retrieval stage
    pub rag_core: String,
    /// Assembled prompts, consumed by the generation stage
    pub llm: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            pii_input: "pii_filtering_queue".to_string(),
            rag_core: "rag_core_queue".to_string(),
            llm: "llm_queue".to_string(),
        }
    }
}

/// Message broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker host name
    pub host: String,
    /// AMQP port
    pub port: u16,
    /// Full AMQP URI; takes precedence over host/port
    pub url: Option<String>,
    /// Acknowledgment mode
    pub ack_mode: AckMode,
    /// Declare queues as durable (must match existing declarations)
    pub durable_queues: bool,
    /// Connection attempt timeout in seconds
    pub connect_timeout_secs: u64,
    /// Stage queue names
    pub queues: QueueNames,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "rabbitmq".to_string(),
            port: 5672,
            url: None,
            ack_mode: AckMode::default(),
            durable_queues: true,
            connect_timeout_secs: 10,
            queues: QueueNames::default(),
        }
    }
}

impl BrokerConfig {
    /// AMQP URI for the configured broker
    pub fn uri(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None if self.host.starts_with("amqp://") || self.host.starts_with("amqps://") => {
                self.host.clone()
            }
            None => format!("amqp://{}:{}/%2f", self.host, self.port),
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Ollama base URL serving the embedding model
    pub base_url: String,
    /// Model to use; must be the same at ingestion and query time
    pub model: String,
    /// Embedding dimensions (384 for all-MiniLM-L6-v2)
    pub dimensions: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "all-minilm".to_string(),
            dimensions: 384,
            timeout_secs: 30,
        }
    }
}

/// Vector store backend selection
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    /// ChromaDB server over HTTP
    #[default]
    Chroma,
    /// JSON files on local disk
    Local,
}

/// Vector database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorDbConfig {
    /// Backend to use
    pub backend: VectorBackend,
    /// ChromaDB host
    pub host: String,
    /// ChromaDB port
    pub port: u16,
    /// Storage directory for the local backend
    pub storage_path: PathBuf,
    /// Collection holding the corpus
    pub collection: String,
    /// Number of chunks retrieved per query
    pub top_k: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::default(),
            host: "chromadb-server".to_string(),
            port: 8000,
            storage_path: PathBuf::from("./chroma_data"),
            collection: "document_embeddings".to_string(),
            top_k: 3,
            timeout_secs: 30,
        }
    }
}

impl VectorDbConfig {
    /// Base URL of the ChromaDB server
    pub fn base_url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

/// LLM (Ollama) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Ollama base URL
    pub base_url: String,
    /// Generation model name
    pub generate_model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            generate_model: "llama3".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Text chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window size in characters
    pub chunk_size: usize,
    /// Overlap between consecutive windows in characters
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

/// Intake server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
        }
    }
}

/// Answer sink kind
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Print answers to stdout
    #[default]
    Stdout,
    /// Append answers as JSON lines to a file
    File,
}

/// Answer sink configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub path: Option<PathBuf>,
}

/// Log format
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: "queue_rag=info,tower_http=info".to_string(),
        }
    }
}
