//! Stage runner: owns a broker handle for the lifetime of one consumption loop

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::queue::{MessageBroker, MessageHandler};

/// A pipeline stage: a message handler bound to its input queue
#[async_trait]
pub trait Stage: MessageHandler {
    /// Stage name for logging
    fn name(&self) -> &'static str;

    /// Queue the stage consumes from
    fn input_queue(&self) -> &str;

    /// Probe collaborators before consuming. Failures are logged, not fatal.
    async fn check_collaborators(&self) {}
}

/// Runs one stage until shutdown or a fatal error, then releases the connection
pub struct StageRunner {
    broker: Arc<dyn MessageBroker>,
    shutdown: CancellationToken,
}

impl StageRunner {
    /// Create a runner over an already connected broker
    pub fn new(broker: Arc<dyn MessageBroker>, shutdown: CancellationToken) -> Self {
        Self { broker, shutdown }
    }

    /// Consume the stage's input queue.
    ///
    /// The broker is closed on every exit path, including interrupt and
    /// fatal handler errors.
    pub async fn run<S: Stage>(&self, stage: &S) -> Result<()> {
        stage.check_collaborators().await;

        tracing::info!(
            stage = stage.name(),
            queue = stage.input_queue(),
            broker = self.broker.name(),
            "Stage started"
        );

        let result = self
            .broker
            .consume(stage.input_queue(), stage, self.shutdown.clone())
            .await;

        if let Err(e) = self.broker.close().await {
            tracing::warn!(stage = stage.name(), error = %e, "Failed to close broker connection");
        }

        match &result {
            Ok(()) => tracing::info!(stage = stage.name(), "Stage stopped"),
            Err(e) => tracing::error!(stage = stage.name(), error = %e, "Stage failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AckMode;
    use crate::error::Error;
    use crate::queue::{InMemoryBroker, Message};

    struct FailingStage;

    #[async_trait]
    impl MessageHandler for FailingStage {
        async fn handle(&self, _message: &Message) -> Result<()> {
            Err(Error::LlmUnavailable("http://localhost:11434".into()))
        }
    }

    impl Stage for FailingStage {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn input_queue(&self) -> &str {
            "in"
        }
    }

    #[tokio::test]
    async fn test_broker_closed_after_fatal_error() {
        let broker = InMemoryBroker::new(AckMode::AfterSuccess);
        broker.publish("in", b"x").await.unwrap();

        let runner = StageRunner::new(Arc::new(broker.clone()), CancellationToken::new());
        let result = runner.run(&FailingStage).await;

        assert!(matches!(result, Err(Error::LlmUnavailable(_))));
        assert!(broker.is_closed());
        assert_eq!(broker.len("in"), 1);
    }

    #[tokio::test]
    async fn test_broker_closed_after_interrupt() {
        let broker = InMemoryBroker::new(AckMode::AfterSuccess);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let runner = StageRunner::new(Arc::new(broker.clone()), shutdown);
        runner.run(&FailingStage).await.unwrap();
        assert!(broker.is_closed());
    }
}
