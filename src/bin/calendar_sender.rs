//! calendar-sender: notification consumer
//!
//! Consumes notifications from the queue and writes one line per
//! notification to stdout, acknowledging each message once handled.
//!
//! ## Architecture
//! ```text
//! [Notification Queue] -> [calendar-sender] -> stdout
//! ```
//!
//! ## Configuration
//! - First argument or CALENDAR_CONFIG: YAML config file (optional)
//! - CALENDAR__*: overrides, e.g. CALENDAR__MESSAGING__TYPE=amqp
//! - CALENDAR_LOG: tracing filter (default: `log.level`)
//!
//! The in-process channel queue has no producer here, so the sender is
//! only useful with `messaging.type: amqp`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use calendar::config::Config;
use calendar::notify::init_notify_queue;
use calendar::sender::{Sender, WriterSink};
use calendar::utils::bootstrap::{init_tracing, shutdown_signal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::load(std::env::args().nth(1).as_deref())?;
    init_tracing(&config.log.level);

    info!("Starting calendar-sender");

    let queue = init_notify_queue(&config.messaging).await.map_err(|e| {
        error!(error = %e, "Failed to initialize notification queue");
        e
    })?;

    let token = CancellationToken::new();
    let deliveries = queue.receiver.register_receiver(token.clone()).await?;

    let sender = Sender::new(deliveries, Arc::new(WriterSink::stdout()));
    if !sender.start(&token) {
        return Err("notification stream closed before the sender started".into());
    }
    info!("Sender running, press Ctrl+C to exit");

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = sender.wait() => warn!("Notification stream closed"),
    }
    token.cancel();

    let timeout = config.sender.shutdown_timeout();
    if tokio::time::timeout(timeout, sender.wait()).await.is_err() {
        error!(timeout_secs = timeout.as_secs(), "Sender did not stop in time");
        return Err("sender shutdown timed out".into());
    }

    info!("calendar-sender stopped");
    Ok(())
}
