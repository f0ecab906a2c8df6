//! Shared state for the intake server

use std::sync::Arc;

use crate::queue::MessageBroker;

/// Broker handle and the queue submissions are published to
#[derive(Clone)]
pub struct AppState {
    broker: Arc<dyn MessageBroker>,
    queue: Arc<str>,
}

impl AppState {
    pub fn new(broker: Arc<dyn MessageBroker>, queue: &str) -> Self {
        Self {
            broker,
            queue: Arc::from(queue),
        }
    }

    pub fn broker(&self) -> &dyn MessageBroker {
        self.broker.as_ref()
    }

    /// PII stage input queue
    pub fn queue(&self) -> &str {
        &self.queue
    }
}
