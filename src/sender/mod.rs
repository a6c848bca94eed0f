//! Notification sender.
//!
//! Drains a delivery stream from the notification queue, writes one
//! human-readable line per notification to a sink and acknowledges every
//! delivery once handled. Deliveries that do not convert to the domain
//! model are logged and acknowledged as well, so they are not redelivered
//! forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::model::Notification;
use crate::notify::Delivery;

/// Destination of rendered notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: &Notification) -> std::io::Result<()>;
}

/// Render the line written for a notification.
pub fn format_notification(notification: &Notification) -> String {
    format!(
        "send notification for ownerID={} eventID={}: {} on {}\n",
        notification.owner_id, notification.event_id, notification.title, notification.date
    )
}

/// Sink writing one line per notification to an async writer.
pub struct WriterSink<W> {
    writer: tokio::sync::Mutex<W>,
}

impl<W> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl WriterSink<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> NotificationSink for WriterSink<W> {
    async fn send(&self, notification: &Notification) -> std::io::Result<()> {
        let line = format_notification(notification);
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await
    }
}

/// Consumes deliveries until cancelled or the input closes.
pub struct Sender {
    input: Arc<tokio::sync::Mutex<mpsc::Receiver<Delivery>>>,
    sink: Arc<dyn NotificationSink>,
    input_closed: Arc<AtomicBool>,
    tracker: TaskTracker,
    running: Mutex<Option<CancellationToken>>,
}

impl Sender {
    pub fn new(input: mpsc::Receiver<Delivery>, sink: Arc<dyn NotificationSink>) -> Self {
        let tracker = TaskTracker::new();
        tracker.close();

        Self {
            input: Arc::new(tokio::sync::Mutex::new(input)),
            sink,
            input_closed: Arc::new(AtomicBool::new(false)),
            tracker,
            running: Mutex::new(None),
        }
    }

    /// Whether the sender can still be started.
    ///
    /// False once the input stream has closed.
    pub fn is_ready(&self) -> bool {
        !self.input_closed.load(Ordering::Acquire)
    }

    /// Start consuming. Returns false if the input has already closed.
    ///
    /// A no-op while running. After `token` is cancelled the sender may be
    /// started again with a fresh token.
    pub fn start(&self, token: &CancellationToken) -> bool {
        if !self.is_ready() {
            warn!("Notification input closed, sender cannot be restarted");
            return false;
        }

        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(|active| !active.is_cancelled()) {
            debug!("Sender already running");
            return true;
        }

        let token = token.child_token();
        *running = Some(token.clone());

        self.tracker.reopen();
        self.tracker.spawn(Self::run(
            self.input.clone(),
            self.sink.clone(),
            self.input_closed.clone(),
            token,
        ));
        self.tracker.close();

        info!("Sender started");
        true
    }

    /// Wait until the consume loop has exited.
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }

    async fn run(
        input: Arc<tokio::sync::Mutex<mpsc::Receiver<Delivery>>>,
        sink: Arc<dyn NotificationSink>,
        input_closed: Arc<AtomicBool>,
        token: CancellationToken,
    ) {
        // A previous run may still be draining its last delivery.
        let mut input = tokio::select! {
            _ = token.cancelled() => return,
            input = input.lock_owned() => input,
        };

        loop {
            let delivery = tokio::select! {
                _ = token.cancelled() => {
                    info!("Sender stopped");
                    return;
                }
                delivery = input.recv() => delivery,
            };

            let Some(delivery) = delivery else {
                input_closed.store(true, Ordering::Release);
                warn!("Notification input closed, sender stopped");
                return;
            };

            Self::handle(sink.as_ref(), delivery).await;
        }
    }

    async fn handle(sink: &dyn NotificationSink, delivery: Delivery) {
        debug!(redelivered = delivery.redelivered(), "Got notification");

        match delivery.message().to_model() {
            Ok(notification) => {
                if let Err(e) = sink.send(&notification).await {
                    error!(
                        owner_id = %notification.owner_id,
                        event_id = %notification.event_id,
                        error = %e,
                        "Failed to write notification"
                    );
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to convert message to notification");
            }
        }

        if let Err(e) = delivery.ack().await {
            error!(error = %e, "Failed to ack notification");
        }
    }
}
