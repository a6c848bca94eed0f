//! AMQP (RabbitMQ) notification queue.
//!
//! Notifications are published persistently to a durable direct exchange
//! and routed to one durable queue. Consumers take messages with manual
//! acknowledgement and a prefetch of one; closing a consumer channel hands
//! its unacknowledged messages back to the broker for redelivery.

use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use deadpool_lapin::{Manager, Pool, PoolError};
use futures::StreamExt;
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::FieldTable,
    BasicProperties, Channel, ExchangeKind,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    Acknowledger, AmqpQueueConfig, Delivery, NotificationMessage, NotificationReceiver, Notifier,
    NotifyError, Result, HANDOFF_CAPACITY,
};
use crate::model::Event;

/// Publish attempts after the first one fails.
const MAX_RETRIES: usize = 5;

/// AMQP notification queue using RabbitMQ.
pub struct AmqpNotificationQueue {
    pool: Pool,
    config: AmqpQueueConfig,
}

impl AmqpNotificationQueue {
    /// Connect and declare the exchange, queue and binding.
    pub async fn new(config: AmqpQueueConfig) -> Result<Self> {
        let manager = Manager::new(config.url.clone(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(10)
            .build()
            .map_err(|e| NotifyError::Connection(format!("Failed to create pool: {}", e)))?;

        let queue = Self { pool, config };
        let channel = queue.get_channel().await?;
        queue.declare_topology(&channel).await?;

        info!(
            exchange = %queue.config.exchange,
            queue = %queue.config.queue,
            url = %queue.config.url,
            "Connected to AMQP"
        );

        Ok(queue)
    }

    /// Get a channel from the pool.
    async fn get_channel(&self) -> Result<Channel> {
        let conn = self.pool.get().await.map_err(|e: PoolError| {
            NotifyError::Connection(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.create_channel()
            .await
            .map_err(|e| NotifyError::Connection(format!("Failed to create channel: {}", e)))
    }

    async fn declare_topology(&self, channel: &Channel) -> Result<()> {
        channel
            .exchange_declare(
                &self.config.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| NotifyError::Connection(format!("Failed to declare exchange: {}", e)))?;

        channel
            .queue_declare(
                &self.config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| NotifyError::Subscribe(format!("Failed to declare queue: {}", e)))?;

        channel
            .queue_bind(
                &self.config.queue,
                &self.config.exchange,
                &self.config.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| NotifyError::Subscribe(format!("Failed to bind queue: {}", e)))?;

        Ok(())
    }

    /// Publish once on a fresh confirm-mode channel.
    async fn publish_once(&self, payload: &[u8]) -> Result<()> {
        let channel = self.get_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| NotifyError::Publish(format!("Failed to enable confirms: {}", e)))?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2); // persistent

        let confirm = channel
            .basic_publish(
                &self.config.exchange,
                &self.config.routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| NotifyError::Publish(format!("Failed to publish: {}", e)))?
            .await
            .map_err(|e| NotifyError::Publish(format!("Publish confirmation failed: {}", e)))?;

        if let Err(e) = channel.close(200, "published").await {
            debug!(error = %e, "Publish channel already closed");
        }

        match confirm {
            Confirmation::Nack(_) => Err(NotifyError::Publish("Broker nacked message".to_string())),
            _ => Ok(()),
        }
    }

    /// Forward broker deliveries to `tx` until cancelled or disconnected.
    async fn consume(
        channel: Channel,
        mut consumer: lapin::Consumer,
        tx: mpsc::Sender<Delivery>,
        token: CancellationToken,
        consumer_tag: String,
    ) {
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => break,
                _ = tx.closed() => break,
                next = consumer.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    warn!(consumer_tag = %consumer_tag, error = %e, "Consumer delivery error");
                    break;
                }
                None => {
                    warn!(consumer_tag = %consumer_tag, "Consumer stream ended");
                    break;
                }
            };

            let message = match NotificationMessage::decode(&delivery.data) {
                Ok(message) => message,
                Err(e) => {
                    error!(
                        delivery_tag = delivery.delivery_tag,
                        error = %e,
                        "Dropping poison notification"
                    );
                    if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
                        error!(error = %e, "Failed to ack poison notification");
                    }
                    continue;
                }
            };

            let inbound = Delivery::new(
                message,
                delivery.redelivered,
                Box::new(AmqpAcker(delivery.acker)),
            );

            tokio::select! {
                _ = token.cancelled() => break,
                sent = tx.send(inbound) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }

        // Unacked messages return to the queue when the channel closes.
        if let Err(e) = channel.close(200, "consumer stopped").await {
            debug!(error = %e, "Consumer channel already closed");
        }
        info!(consumer_tag = %consumer_tag, "Notification consumer stopped");
    }
}

#[async_trait]
impl Notifier for AmqpNotificationQueue {
    #[tracing::instrument(
        name = "queue.publish",
        skip_all,
        fields(owner_id = %event.owner_id(), event_id = %event.event_id())
    )]
    async fn notify(&self, event: &Event) -> Result<()> {
        let payload = NotificationMessage::from_event(event).encode()?;

        // Exponential backoff with jitter to prevent thundering herd
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(5))
            .with_max_times(MAX_RETRIES)
            .with_jitter()
            .build();

        let mut last_error = None;

        for (attempt, delay) in std::iter::once(Duration::ZERO).chain(backoff).enumerate() {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }

            match self.publish_once(&payload).await {
                Ok(()) => {
                    debug!(
                        exchange = %self.config.exchange,
                        routing_key = %self.config.routing_key,
                        "Published notification"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        max_retries = MAX_RETRIES,
                        error = %e,
                        "Publish failed, retrying..."
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| NotifyError::Publish("Max retries exceeded".to_string())))
    }
}

#[async_trait]
impl NotificationReceiver for AmqpNotificationQueue {
    async fn register_receiver(
        &self,
        token: CancellationToken,
    ) -> Result<mpsc::Receiver<Delivery>> {
        let channel = self.get_channel().await?;

        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| NotifyError::Subscribe(format!("Failed to set prefetch: {}", e)))?;

        let consumer_tag = format!("calendar-sender-{}", Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                &self.config.queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| NotifyError::Subscribe(format!("Failed to start consumer: {}", e)))?;

        info!(
            queue = %self.config.queue,
            consumer_tag = %consumer_tag,
            "Notification consumer registered"
        );

        let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
        tokio::spawn(Self::consume(channel, consumer, tx, token, consumer_tag));

        Ok(rx)
    }
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| NotifyError::Ack(e.to_string()))
    }
}
