//! In-process notification queue for standalone mode.
//!
//! Honours the same at-least-once contract as a broker: every message
//! handed to a consumer stays in an unacknowledged set until acked, and a
//! consumer that stops returns its unacknowledged messages to the front of
//! the queue flagged as redelivered. Nothing survives the process.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{
    Acknowledger, Delivery, NotificationMessage, NotificationReceiver, Notifier, NotifyError,
    Result, HANDOFF_CAPACITY,
};
use crate::model::Event;

type ConsumerId = u64;
type DeliveryTag = u64;

#[derive(Debug, Clone)]
struct Envelope {
    tag: DeliveryTag,
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Envelope>,
    unacked: HashMap<DeliveryTag, (ConsumerId, Envelope)>,
    next_tag: DeliveryTag,
    next_consumer: ConsumerId,
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    available: Notify,
}

impl Shared {
    async fn take(&self, consumer: ConsumerId) -> Option<Envelope> {
        let mut state = self.state.lock().await;
        let envelope = state.ready.pop_front()?;
        state.unacked.insert(envelope.tag, (consumer, envelope.clone()));
        if !state.ready.is_empty() {
            self.available.notify_one();
        }
        Some(envelope)
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<()> {
        self.state
            .lock()
            .await
            .unacked
            .remove(&tag)
            .map(|_| ())
            .ok_or_else(|| NotifyError::Ack(format!("unknown delivery tag {tag}")))
    }

    /// Return every unacked message of `consumer` to the front of the queue.
    async fn requeue(&self, consumer: ConsumerId) -> usize {
        let mut state = self.state.lock().await;

        let mut tags: Vec<DeliveryTag> = state
            .unacked
            .iter()
            .filter(|(_, (owner, _))| *owner == consumer)
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable();

        for tag in tags.iter().rev() {
            if let Some((_, mut envelope)) = state.unacked.remove(tag) {
                envelope.redelivered = true;
                state.ready.push_front(envelope);
            }
        }

        if !tags.is_empty() {
            self.available.notify_one();
        }
        tags.len()
    }
}

/// In-process implementation of `Notifier` and `NotificationReceiver`.
///
/// Clones share the same queue.
#[derive(Clone, Default)]
pub struct ChannelNotificationQueue {
    shared: Arc<Shared>,
}

impl ChannelNotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of (ready, unacknowledged) messages.
    pub async fn depth(&self) -> (usize, usize) {
        let state = self.shared.state.lock().await;
        (state.ready.len(), state.unacked.len())
    }

    /// Enqueue a raw payload.
    pub async fn publish_raw(&self, payload: Vec<u8>) {
        let mut state = self.shared.state.lock().await;
        let tag = state.next_tag;
        state.next_tag += 1;
        state.ready.push_back(Envelope {
            tag,
            payload,
            redelivered: false,
        });
        drop(state);
        self.shared.available.notify_one();
    }

    async fn consume(
        shared: Arc<Shared>,
        consumer: ConsumerId,
        tx: mpsc::Sender<Delivery>,
        token: CancellationToken,
    ) {
        loop {
            let envelope = loop {
                if let Some(envelope) = shared.take(consumer).await {
                    break envelope;
                }
                tokio::select! {
                    _ = token.cancelled() => return Self::stop(&shared, consumer).await,
                    _ = tx.closed() => return Self::stop(&shared, consumer).await,
                    _ = shared.available.notified() => {}
                }
            };

            let message = match NotificationMessage::decode(&envelope.payload) {
                Ok(message) => message,
                Err(e) => {
                    error!(tag = envelope.tag, error = %e, "Dropping poison notification");
                    if let Err(e) = shared.ack(envelope.tag).await {
                        error!(error = %e, "Failed to ack poison notification");
                    }
                    continue;
                }
            };

            let delivery = Delivery::new(
                message,
                envelope.redelivered,
                Box::new(ChannelAcker {
                    shared: shared.clone(),
                    tag: envelope.tag,
                }),
            );

            tokio::select! {
                _ = token.cancelled() => return Self::stop(&shared, consumer).await,
                sent = tx.send(delivery) => {
                    if sent.is_err() {
                        return Self::stop(&shared, consumer).await;
                    }
                }
            }
        }
    }

    async fn stop(shared: &Shared, consumer: ConsumerId) {
        let requeued = shared.requeue(consumer).await;
        info!(consumer, requeued, "Notification consumer stopped");
    }
}

#[async_trait]
impl Notifier for ChannelNotificationQueue {
    async fn notify(&self, event: &Event) -> Result<()> {
        let payload = NotificationMessage::from_event(event).encode()?;
        self.publish_raw(payload).await;
        debug!(
            owner_id = %event.owner_id(),
            event_id = %event.event_id(),
            "Queued notification"
        );
        Ok(())
    }
}

#[async_trait]
impl NotificationReceiver for ChannelNotificationQueue {
    async fn register_receiver(
        &self,
        token: CancellationToken,
    ) -> Result<mpsc::Receiver<Delivery>> {
        let consumer = {
            let mut state = self.shared.state.lock().await;
            let id = state.next_consumer;
            state.next_consumer += 1;
            id
        };

        let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
        tokio::spawn(Self::consume(self.shared.clone(), consumer, tx, token));

        info!(consumer, "Notification consumer registered");
        Ok(rx)
    }
}

struct ChannelAcker {
    shared: Arc<Shared>,
    tag: DeliveryTag,
}

#[async_trait]
impl Acknowledger for ChannelAcker {
    async fn ack(&self) -> Result<()> {
        self.shared.ack(self.tag).await
    }
}
