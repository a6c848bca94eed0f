//! calendar-scheduler: reminder publisher and purger
//!
//! Periodically publishes notifications for events whose reminder time has
//! arrived and deletes events that ended long ago.
//!
//! ## Architecture
//! ```text
//! [Event Storage] -> [calendar-scheduler] -> [Notification Queue]
//! ```
//!
//! ## Configuration
//! - First argument or CALENDAR_CONFIG: YAML config file (optional)
//! - CALENDAR__*: overrides, e.g. CALENDAR__STORAGE__TYPE=postgres
//! - CALENDAR_LOG: tracing filter (default: `log.level`)

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use calendar::config::Config;
use calendar::notify::init_notify_queue;
use calendar::scheduler::Scheduler;
use calendar::storage::init_storage;
use calendar::utils::bootstrap::{init_tracing, shutdown_signal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::load(std::env::args().nth(1).as_deref())?;
    init_tracing(&config.log.level);

    info!("Starting calendar-scheduler");

    let storage = init_storage(&config.storage).await.map_err(|e| {
        error!(error = %e, "Failed to initialize event storage");
        e
    })?;
    let queue = init_notify_queue(&config.messaging).await.map_err(|e| {
        error!(error = %e, "Failed to initialize notification queue");
        e
    })?;

    let scheduler = Scheduler::new(
        storage,
        queue.notifier,
        config.scheduler.to_scheduler_config(),
    );

    let token = CancellationToken::new();
    scheduler.schedule(&token);
    info!(
        notify_interval_secs = config.scheduler.notify_interval_secs,
        purge_interval_secs = config.scheduler.purge_interval_secs,
        "Scheduler running, press Ctrl+C to exit"
    );

    shutdown_signal().await;
    token.cancel();
    scheduler.wait().await;

    info!("calendar-scheduler stopped");
    Ok(())
}
