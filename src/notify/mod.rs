//! Notification queue.
//!
//! This module contains:
//! - `Notifier` trait: producer side, used by the scheduler
//! - `NotificationReceiver` trait: consumer side, used by the sender
//! - `Delivery` / `Acknowledger`: an inbound message and its ack handle
//! - `NotificationMessage`: the wire record
//! - Messaging configuration types and the `init_notify_queue` factory
//! - Implementations: in-process channel, AMQP (RabbitMQ), Mock
//!
//! Delivery is at-least-once. A message leaves the queue only when its
//! consumer calls `Delivery::ack`; unacknowledged messages of a stopped
//! consumer go back to the queue flagged as redelivered.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::model::{Event, EventId, ModelError, Notification, OwnerId, Title};

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod channel;
pub mod mock;

#[cfg(feature = "amqp")]
pub use amqp::AmqpNotificationQueue;
pub use channel::ChannelNotificationQueue;
pub use mock::MockNotifier;

// ============================================================================
// Errors
// ============================================================================

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, NotifyError>;

/// Errors that can occur during queue operations.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Ack failed: {0}")]
    Ack(String),

    #[error("Malformed notification: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid notification: {0}")]
    Invalid(#[from] ModelError),
}

// ============================================================================
// Traits
// ============================================================================

/// Producer side of the queue.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish a notification for `event` durably.
    ///
    /// Returns once the queue has accepted the message.
    async fn notify(&self, event: &Event) -> Result<()>;
}

/// Consumer side of the queue.
#[async_trait]
pub trait NotificationReceiver: Send + Sync {
    /// Register a consumer and return its delivery stream.
    ///
    /// The stream ends when `token` is cancelled, when the returned receiver
    /// is dropped, or when the transport fails. A fresh registration is
    /// required to resume consuming. Poison messages are acknowledged and
    /// logged here and never reach the stream.
    async fn register_receiver(&self, token: CancellationToken)
        -> Result<mpsc::Receiver<Delivery>>;
}

/// Acknowledgement handle attached to a delivery.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;
}

/// Capacity of the hand-off channel between a consumer task and its
/// receiver. One slot keeps a slow consumer back-pressuring the queue.
pub(crate) const HANDOFF_CAPACITY: usize = 1;

/// An inbound notification with its acknowledgement handle.
pub struct Delivery {
    message: NotificationMessage,
    redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(message: NotificationMessage, redelivered: bool, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            message,
            redelivered,
            acker,
        }
    }

    pub fn message(&self) -> &NotificationMessage {
        &self.message
    }

    /// Whether the transport delivered this message before without an ack.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// Remove the message from the queue.
    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("redelivered", &self.redelivered)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Wire format
// ============================================================================

/// Queued notification record.
///
/// Identifiers and title travel as plain strings and are validated against
/// the model rules on decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    pub event_id: String,
    pub owner_id: String,
    pub title: String,
    pub date: DateTime<Utc>,
}

impl NotificationMessage {
    pub fn from_event(event: &Event) -> Self {
        Self::from(&Notification::from_event(event))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and validate a queued payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let message: Self = serde_json::from_slice(payload)?;
        message.to_model()?;
        Ok(message)
    }

    /// Convert to the domain model, applying its construction rules.
    pub fn to_model(&self) -> std::result::Result<Notification, ModelError> {
        Ok(Notification {
            event_id: EventId::parse(&self.event_id)?,
            owner_id: OwnerId::parse(&self.owner_id)?,
            title: Title::new(self.title.as_str())?,
            date: self.date,
        })
    }
}

impl From<&Notification> for NotificationMessage {
    fn from(notification: &Notification) -> Self {
        Self {
            event_id: notification.event_id.to_string(),
            owner_id: notification.owner_id.to_string(),
            title: notification.title.to_string(),
            date: notification.date,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Messaging type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// In-process queue; producer and consumer must share the process.
    #[default]
    Channel,
    /// AMQP/RabbitMQ messaging.
    Amqp,
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messaging type discriminator.
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    /// AMQP-specific configuration.
    pub amqp: AmqpQueueConfig,
}

/// AMQP-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AmqpQueueConfig {
    /// AMQP connection URL.
    pub url: String,
    /// Direct exchange notifications are published to.
    pub exchange: String,
    /// Durable queue bound to the exchange.
    pub queue: String,
    /// Routing key binding the queue to the exchange.
    pub routing_key: String,
}

impl Default for AmqpQueueConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672".to_string(),
            exchange: "calendar".to_string(),
            queue: "calendar.scheduler".to_string(),
            routing_key: "notify".to_string(),
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Both ends of a notification queue.
#[derive(Clone)]
pub struct NotifyQueue {
    pub notifier: Arc<dyn Notifier>,
    pub receiver: Arc<dyn NotificationReceiver>,
}

/// Initialize the notification queue based on configuration.
///
/// Broker connection failures are returned to the caller.
pub async fn init_notify_queue(
    config: &MessagingConfig,
) -> std::result::Result<NotifyQueue, Box<dyn std::error::Error + Send + Sync>> {
    match config.messaging_type {
        MessagingType::Channel => {
            warn!("In-process notification queue: messages do not leave this process");
            let queue = Arc::new(ChannelNotificationQueue::new());
            info!(messaging_type = "channel", "Notification queue initialized");
            Ok(NotifyQueue {
                notifier: queue.clone(),
                receiver: queue,
            })
        }
        MessagingType::Amqp => {
            #[cfg(feature = "amqp")]
            {
                let queue = Arc::new(AmqpNotificationQueue::new(config.amqp.clone()).await?);
                info!(messaging_type = "amqp", "Notification queue initialized");
                Ok(NotifyQueue {
                    notifier: queue.clone(),
                    receiver: queue,
                })
            }
            #[cfg(not(feature = "amqp"))]
            {
                Err("AMQP support requires the 'amqp' feature. Rebuild with --features amqp".into())
            }
        }
    }
}
