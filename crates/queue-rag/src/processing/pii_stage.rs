//! PII redaction stage: raw client text in, redacted text out

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::config::QueueNames;
use crate::error::{Error, Result};
use crate::pii::PiiRedactor;
use crate::queue::{Message, MessageBroker, MessageHandler};

use super::worker::Stage;

/// Consumes raw text, publishes redacted text
pub struct PiiStage {
    broker: Arc<dyn MessageBroker>,
    redactor: PiiRedactor,
    input: String,
    output: String,
}

impl PiiStage {
    pub fn new(broker: Arc<dyn MessageBroker>, queues: &QueueNames) -> Self {
        Self {
            broker,
            redactor: PiiRedactor::new(),
            input: queues.pii_input.clone(),
            output: queues.rag_core.clone(),
        }
    }
}

/// Unwrap the client's `{"text": ...}` envelope; any other body is the text itself
pub fn extract_text(queue: &str, body: &str) -> Result<String> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('{') {
        if let Ok(Value::Object(envelope)) = serde_json::from_str::<Value>(trimmed) {
            return match envelope.get("text") {
                Some(Value::String(text)) => Ok(text.clone()),
                _ => Err(Error::malformed(queue, "JSON body has no string 'text' field")),
            };
        }
    }
    Ok(body.to_string())
}

#[async_trait]
impl MessageHandler for PiiStage {
    async fn handle(&self, message: &Message) -> Result<()> {
        let text = extract_text(&message.queue, message.text()?)?;
        if text.trim().is_empty() {
            return Err(Error::malformed(&message.queue, "empty text"));
        }

        let (redacted, report) = self.redactor.redact_with_report(&text);
        tracing::debug!(original = %text, "Received text");
        tracing::info!(
            redacted = %redacted,
            emails = report.emails,
            phones = report.phones,
            names = report.names,
            "Redacted text"
        );

        self.broker.publish(&self.output, redacted.as_bytes()).await?;
        tracing::info!(queue = %self.output, "Forwarded redacted text");
        Ok(())
    }
}

impl Stage for PiiStage {
    fn name(&self) -> &'static str {
        "pii"
    }

    fn input_queue(&self) -> &str {
        &self.input
    }
}
