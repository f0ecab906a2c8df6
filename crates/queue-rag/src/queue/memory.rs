//! In-process broker with the same delivery semantics as the AMQP broker
//!
//! Queues live in a shared map, so several stages holding clones of one
//! `InMemoryBroker` can hand messages to each other inside a single process.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::AckMode;
use crate::error::{Error, Result};

use super::{check_outcome, Message, MessageBroker, MessageHandler, Settlement};

#[derive(Default)]
struct MemoryQueue {
    messages: Mutex<VecDeque<Message>>,
    available: Notify,
}

#[derive(Default)]
struct Shared {
    queues: DashMap<String, Arc<MemoryQueue>>,
    next_tag: AtomicU64,
    /// Published but not yet settled, across all queues
    outstanding: AtomicUsize,
}

/// In-process broker. Clones share queues; each clone has its own open/closed state.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
    ack_mode: AckMode,
    closed: Arc<AtomicBool>,
}

impl InMemoryBroker {
    /// Create an empty broker
    pub fn new(ack_mode: AckMode) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            ack_mode,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Another handle onto the same queues, as a separate stage would hold
    pub fn connect(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            ack_mode: self.ack_mode,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether `close` was called on this handle
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of messages waiting in `queue`
    pub fn len(&self, queue: &str) -> usize {
        self.shared
            .queues
            .get(queue)
            .map(|q| q.messages.lock().len())
            .unwrap_or(0)
    }

    /// Whether `queue` has no waiting messages
    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    /// True when every published message has been settled.
    ///
    /// A handler publishes downstream before its own delivery is settled, so
    /// this never reports idle while a chain of stages is still working.
    pub fn is_idle(&self) -> bool {
        self.shared.outstanding.load(Ordering::SeqCst) == 0
    }

    /// Snapshot of the bodies waiting in `queue`, oldest first
    pub fn peek_bodies(&self, queue: &str) -> Vec<Vec<u8>> {
        self.shared
            .queues
            .get(queue)
            .map(|q| q.messages.lock().iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    fn queue(&self, name: &str) -> Arc<MemoryQueue> {
        self.shared
            .queues
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::broker("connection already closed"));
        }
        Ok(())
    }

    async fn next_delivery(&self, queue: &MemoryQueue) -> Message {
        loop {
            let next = queue.messages.lock().pop_front();
            if let Some(message) = next {
                return message;
            }
            queue.available.notified().await;
        }
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn declare(&self, queue: &str) -> Result<()> {
        self.ensure_open()?;
        self.queue(queue);
        Ok(())
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let target = self.queue(queue);
        let message = Message {
            queue: queue.to_string(),
            body: body.to_vec(),
            delivery_tag: self.shared.next_tag.fetch_add(1, Ordering::SeqCst) + 1,
            redelivered: false,
        };
        self.shared.outstanding.fetch_add(1, Ordering::SeqCst);
        target.messages.lock().push_back(message);
        target.available.notify_one();
        tracing::debug!(queue, bytes = body.len(), "Sent message");
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        handler: &dyn MessageHandler,
        shutdown: CancellationToken,
    ) -> Result<()> {
        self.declare(queue).await?;
        let source = self.queue(queue);

        tracing::info!(queue, ack_mode = ?self.ack_mode, "Waiting for messages");

        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(queue, "Consumer interrupted");
                    return Ok(());
                }
                message = self.next_delivery(&source) => message,
            };

            if self.is_closed() {
                source.messages.lock().push_front(message);
                return Err(Error::ConnectionClosed(queue.to_string()));
            }

            let outcome = handler.handle(&message).await;
            if Settlement::for_outcome(&outcome, self.ack_mode) == Settlement::Requeue {
                let delivery_tag = message.delivery_tag;
                source.messages.lock().push_front(Message {
                    redelivered: true,
                    ..message
                });
                source.available.notify_one();
                if let Some(err) = check_outcome(queue, delivery_tag, outcome) {
                    return Err(err);
                }
                continue;
            }

            self.shared.outstanding.fetch_sub(1, Ordering::SeqCst);
            if let Some(err) = check_outcome(queue, message.delivery_tag, outcome) {
                return Err(err);
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!("Closed in-memory broker handle");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
