//! RabbitMQ broker over AMQP 0-9-1

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, BasicRejectOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::{AckMode, BrokerConfig};
use crate::error::{Error, Result};

use super::{check_outcome, Message, MessageBroker, MessageHandler, Settlement};

/// Persistent delivery mode (survives broker restart on durable queues)
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// One AMQP connection with one channel, owned by a single stage
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
    ack_mode: AckMode,
    durable: bool,
    closed: AtomicBool,
}

impl AmqpBroker {
    /// Open a connection and a channel with publisher confirms enabled
    pub async fn connect(config: &BrokerConfig) -> Result<Self> {
        let uri = config.uri();
        let endpoint = endpoint_label(&uri);
        let timeout = Duration::from_secs(config.connect_timeout_secs.max(1));

        let unavailable = |message: String| Error::BrokerUnavailable {
            host: endpoint.clone(),
            message,
        };

        let connection =
            tokio::time::timeout(timeout, Connection::connect(&uri, ConnectionProperties::default()))
                .await
                .map_err(|_| unavailable(format!("timed out after {}s", timeout.as_secs())))?
                .map_err(|e| unavailable(e.to_string()))?;

        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        tracing::info!(broker = %endpoint, "Connected to RabbitMQ");

        Ok(Self {
            connection,
            channel,
            ack_mode: config.ack_mode,
            durable: config.durable_queues,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::broker("connection already closed"));
        }
        Ok(())
    }

    async fn settle(&self, delivery: &lapin::message::Delivery, settlement: Settlement) -> Result<()> {
        match settlement {
            Settlement::Ack => {
                delivery.acker.ack(BasicAckOptions::default()).await?;
            }
            Settlement::Drop => {
                delivery
                    .acker
                    .reject(BasicRejectOptions { requeue: false })
                    .await?;
            }
            Settlement::Requeue => {
                delivery
                    .acker
                    .nack(BasicNackOptions {
                        multiple: false,
                        requeue: true,
                    })
                    .await?;
            }
            Settlement::AlreadySettled => {}
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for AmqpBroker {
    async fn declare(&self, queue: &str) -> Result<()> {
        self.ensure_open()?;
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: self.durable,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<()> {
        self.declare(queue).await?;

        let confirmation = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default()
                    .with_content_type("text/plain".into())
                    .with_delivery_mode(DELIVERY_MODE_PERSISTENT),
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(Error::broker(format!("broker rejected publish to '{}'", queue)));
        }

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

        // One unacknowledged delivery at a time keeps processing sequential.
        // Has no effect under AckMode::Auto (no-ack consumers are not limited).
        self.channel
            .basic_qos(1, BasicQosOptions::default())
            .await?;

        let consumer_tag = format!("queue-rag-{}", uuid::Uuid::new_v4());
        let mut consumer = self
            .channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: self.ack_mode == AckMode::Auto,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        tracing::info!(queue, ack_mode = ?self.ack_mode, "Waiting for messages. To exit press CTRL+C");

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(queue, "Consumer interrupted");
                    return Ok(());
                }
                next = consumer.next() => next,
            };

            let mut delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(Error::ConnectionClosed(queue.to_string())),
            };

            let message = Message {
                queue: queue.to_string(),
                body: std::mem::take(&mut delivery.data),
                delivery_tag: delivery.delivery_tag,
                redelivered: delivery.redelivered,
            };
            tracing::debug!(queue, delivery_tag = message.delivery_tag, "Received message");

            let outcome = handler.handle(&message).await;
            self.settle(&delivery, Settlement::for_outcome(&outcome, self.ack_mode))
                .await?;

            if let Some(err) = check_outcome(queue, message.delivery_tag, outcome) {
                return Err(err);
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.connection.status().connected() {
            self.connection.close(200, "OK").await?;
            tracing::info!("Closed connection to RabbitMQ");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "rabbitmq"
    }
}

/// Broker URI without credentials, for logs and errors
fn endpoint_label(uri: &str) -> String {
    let (scheme, rest) = uri.split_once("://").unwrap_or(("amqp", uri));
    let rest = rest.rsplit_once('@').map(|(_, host)| host).unwrap_or(rest);
    format!("{}://{}", scheme, rest)
}
