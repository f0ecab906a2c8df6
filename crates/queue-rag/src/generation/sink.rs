//! Terminal output of the pipeline

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::{SinkConfig, SinkKind};
use crate::error::{Error, Result};

/// A generated answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub id: Uuid,
    pub model: String,
    pub prompt: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

impl Answer {
    /// Record a fresh answer
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            model: model.into(),
            prompt: prompt.into(),
            answer: answer.into(),
            created_at: Utc::now(),
        }
    }
}

/// Destination for generated answers
#[async_trait]
pub trait AnswerSink: Send + Sync {
    /// Persist or display one answer
    async fn write(&self, answer: &Answer) -> Result<()>;
}

/// Build the sink selected in configuration
pub fn from_config(config: &SinkConfig) -> Result<Box<dyn AnswerSink>> {
    match (config.kind, &config.path) {
        (SinkKind::Stdout, _) => Ok(Box::new(StdoutSink)),
        (SinkKind::File, Some(path)) => Ok(Box::new(JsonlFileSink::new(path))),
        (SinkKind::File, None) => Err(Error::Config("sink.path is required for the file sink".into())),
    }
}

/// Prints answers to standard output
pub struct StdoutSink;

#[async_trait]
impl AnswerSink for StdoutSink {
    async fn write(&self, answer: &Answer) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        let line = format!("{}\n", answer.answer);
        stdout
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Sink(e.to_string()))?;
        stdout.flush().await.map_err(|e| Error::Sink(e.to_string()))
    }
}

/// Appends answers as JSON lines
pub struct JsonlFileSink {
    path: PathBuf,
}

impl JsonlFileSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl AnswerSink for JsonlFileSink {
    async fn write(&self, answer: &Answer) -> Result<()> {
        let mut line = serde_json::to_string(answer)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::Sink(format!("{}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Sink(format!("{}: {}", self.path.display(), e)))?;
        file.flush().await.map_err(|e| Error::Sink(e.to_string()))?;

        tracing::debug!(path = %self.path.display(), id = %answer.id, "Wrote answer");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_jsonl_sink_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("answers.jsonl");
        let sink = JsonlFileSink::new(&path);

        sink.write(&Answer::new("llama3", "p1", "first")).await.unwrap();
        sink.write(&Answer::new("llama3", "p2", "second")).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let answers: Vec<Answer> = raw.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(answers.len(), 2);
        assert_eq!(answers[0].answer, "first");
        assert_eq!(answers[1].prompt, "p2");
        assert_ne!(answers[0].id, answers[1].id);
    }

    #[tokio::test]
    async fn test_unwritable_path_is_sink_error() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlFileSink::new(dir.path().join("missing").join("answers.jsonl"));

        let err = sink.write(&Answer::new("llama3", "p", "a")).await.unwrap_err();
        assert!(matches!(err, Error::Sink(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_from_config_requires_path_for_file() {
        let config = SinkConfig {
            kind: SinkKind::File,
            path: None,
        };
        assert!(from_config(&config).is_err());
        assert!(from_config(&SinkConfig::default()).is_ok());
    }
}
