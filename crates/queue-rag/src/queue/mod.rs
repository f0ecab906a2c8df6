//! Message broker abstraction shared by every pipeline stage
//!
//! A stage owns exactly one broker handle. It publishes with [`MessageBroker::publish`]
//! and blocks inside [`MessageBroker::consume`], which hands deliveries to a
//! [`MessageHandler`] strictly one at a time.
//!
//! Implementations:
//! - `AmqpBroker`: RabbitMQ over AMQP 0-9-1
//! - `InMemoryBroker`: in-process queues for tests and single-process runs

pub mod amqp;
pub mod memory;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::AckMode;
use crate::error::{Error, Result};

pub use amqp::AmqpBroker;
pub use memory::InMemoryBroker;

/// A delivered message. Never mutated; stages publish derived bodies instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Queue the message was consumed from
    pub queue: String,
    /// Raw payload (UTF-8 text by contract)
    pub body: Vec<u8>,
    /// Broker-assigned tag used for acknowledgment
    pub delivery_tag: u64,
    /// Whether the broker delivered this message before
    pub redelivered: bool,
}

impl Message {
    /// Decode the body as UTF-8 text
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.body)
            .map_err(|e| Error::malformed(&self.queue, format!("body is not valid UTF-8: {}", e)))
    }
}

/// Per-message callback invoked by the consumption loop.
///
/// The loop awaits each call before pulling the next delivery, so a handler
/// is never re-entered.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one delivery. Fatal errors (see [`Error::is_fatal`]) stop the loop.
    async fn handle(&self, message: &Message) -> Result<()>;
}

/// Connection to a message broker
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Ensure a durable queue exists. Idempotent.
    async fn declare(&self, queue: &str) -> Result<()>;

    /// Declare `queue`, enqueue `body`, and wait for the broker to accept it
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<()>;

    /// Declare `queue` and feed deliveries to `handler` until `shutdown` is
    /// cancelled, the connection drops, or the handler fails fatally.
    async fn consume(
        &self,
        queue: &str,
        handler: &dyn MessageHandler,
        shutdown: CancellationToken,
    ) -> Result<()>;

    /// Release the connection. Safe to call repeatedly.
    async fn close(&self) -> Result<()>;

    /// Get broker name for logging
    fn name(&self) -> &str;
}

/// What happens to a delivery once its handler returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Acknowledge and remove
    Ack,
    /// Remove without processing credit (bad input)
    Drop,
    /// Hand back to the queue for a later consumer
    Requeue,
    /// Already acknowledged on delivery
    AlreadySettled,
}

impl Settlement {
    /// Decide the settlement for a handler outcome under the given ack mode
    pub fn for_outcome(outcome: &Result<()>, mode: AckMode) -> Self {
        match (mode, outcome) {
            (AckMode::Auto, _) => Settlement::AlreadySettled,
            (AckMode::AfterSuccess, Ok(())) => Settlement::Ack,
            (AckMode::AfterSuccess, Err(e)) if e.is_fatal() => Settlement::Requeue,
            (AckMode::AfterSuccess, Err(_)) => Settlement::Drop,
        }
    }
}

/// Log a handler outcome and turn fatal errors into the loop's return value.
///
/// Returns `Some(err)` when consumption must stop.
pub(crate) fn check_outcome(queue: &str, delivery_tag: u64, outcome: Result<()>) -> Option<Error> {
    match outcome {
        Ok(()) => None,
        Err(e) if e.is_fatal() => {
            tracing::error!(queue, delivery_tag, error = %e, "Fatal error while handling message, stopping consumer");
            Some(e)
        }
        Err(e) => {
            tracing::warn!(queue, delivery_tag, error = %e, "Dropping message after processing error");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settlement_after_success() {
        let mode = AckMode::AfterSuccess;
        assert_eq!(Settlement::for_outcome(&Ok(()), mode), Settlement::Ack);
        assert_eq!(
            Settlement::for_outcome(&Err(Error::malformed("q", "bad utf-8")), mode),
            Settlement::Drop
        );
        assert_eq!(
            Settlement::for_outcome(&Err(Error::LlmUnavailable("x".into())), mode),
            Settlement::Requeue
        );
    }

    #[test]
    fn test_settlement_auto_ack_never_requeues() {
        let fatal: Result<()> = Err(Error::broker("publish failed"));
        assert_eq!(
            Settlement::for_outcome(&fatal, AckMode::Auto),
            Settlement::AlreadySettled
        );
    }

    #[test]
    fn test_message_text_rejects_invalid_utf8() {
        let message = Message {
            queue: "rag_core_queue".to_string(),
            body: vec![0xff, 0xfe],
            delivery_tag: 1,
            redelivered: false,
        };
        assert!(matches!(message.text(), Err(Error::MalformedMessage { .. })));
    }

    #[test]
    fn test_check_outcome_only_stops_on_fatal() {
        assert!(check_outcome("q", 1, Ok(())).is_none());
        assert!(check_outcome("q", 2, Err(Error::malformed("q", "empty"))).is_none());
        assert!(check_outcome("q", 3, Err(Error::llm("HTTP 502"))).is_some());
    }
}
