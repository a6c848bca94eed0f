//! Notification scheduler.
//!
//! Two independent periodic activities share one storage handle:
//!
//! - **notify**: scans `[from, to)` for events whose notify time falls in
//!   the window and hands each to the `Notifier`. `from` is a watermark set
//!   on the first tick and moved to `to` after every successful scan, so
//!   consecutive windows are contiguous and never revisited.
//! - **purge**: deletes events that ended more than `purge_older_than` ago.
//!
//! Both run immediately on start, then once per interval. A tick is never
//! interrupted; cancellation is observed between ticks.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::notify::Notifier;
use crate::storage::EventStorage;

/// Smallest accepted tick period.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Scheduler timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// How often to scan for events to notify.
    pub notify_interval: Duration,
    /// How often to purge old events.
    pub purge_interval: Duration,
    /// Events that ended longer ago than this are purged.
    pub purge_older_than: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            notify_interval: Duration::from_secs(60),
            purge_interval: Duration::from_secs(60 * 60),
            purge_older_than: Duration::from_secs(365 * 24 * 60 * 60),
        }
    }
}

/// Processed-up-to marker of the notify activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyWatermark {
    from: Option<DateTime<Utc>>,
}

impl NotifyWatermark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start of the next window, once the first window has been opened.
    pub fn from(&self) -> Option<DateTime<Utc>> {
        self.from
    }

    /// Window to scan at `now`: `[from, now + period)`.
    ///
    /// The first call pins `from` to `now`.
    pub fn next_window(
        &mut self,
        now: DateTime<Utc>,
        period: TimeDelta,
    ) -> (DateTime<Utc>, DateTime<Utc>) {
        let from = *self.from.get_or_insert(now);
        let to = now.checked_add_signed(period).unwrap_or(DateTime::<Utc>::MAX_UTC);
        (from, to)
    }

    /// Mark everything before `to` as processed. Never moves backwards.
    pub fn advance(&mut self, to: DateTime<Utc>) {
        match self.from {
            Some(from) if from >= to => {}
            _ => self.from = Some(to),
        }
    }
}

/// One unit of periodic work.
#[async_trait]
trait Activity: Send + 'static {
    fn name(&self) -> &'static str;

    async fn tick(&mut self);
}

struct NotifyActivity {
    storage: Arc<dyn EventStorage>,
    notifier: Arc<dyn Notifier>,
    watermark: NotifyWatermark,
    period: TimeDelta,
}

#[async_trait]
impl Activity for NotifyActivity {
    fn name(&self) -> &'static str {
        "notify"
    }

    async fn tick(&mut self) {
        let (from, to) = self.watermark.next_window(Utc::now(), self.period);
        debug!(from = %from, to = %to, "Retrieving events to notify");

        let events = match self.storage.query_events_to_notify(from, to).await {
            Ok(events) => events,
            Err(e) => {
                error!(from = %from, to = %to, error = %e, "Failed to query events to notify");
                return;
            }
        };

        // Publish failures are not retried here; the window is done.
        self.watermark.advance(to);

        if !events.is_empty() {
            info!(count = events.len(), "Found events to notify");
        }

        for event in &events {
            if let Err(e) = self.notifier.notify(event).await {
                error!(
                    owner_id = %event.owner_id(),
                    event_id = %event.event_id(),
                    error = %e,
                    "Failed to send notification for event"
                );
            }
        }
    }
}

struct PurgeActivity {
    storage: Arc<dyn EventStorage>,
    older_than: TimeDelta,
}

#[async_trait]
impl Activity for PurgeActivity {
    fn name(&self) -> &'static str {
        "purge"
    }

    async fn tick(&mut self) {
        let Some(cutoff) = Utc::now().checked_sub_signed(self.older_than) else {
            debug!("Retention reaches past the earliest instant, nothing to purge");
            return;
        };

        debug!(older_than = %cutoff, "Purging old events");
        if let Err(e) = self.storage.purge_old_events(cutoff).await {
            error!(older_than = %cutoff, error = %e, "Failed to purge old events");
        }
    }
}

/// Runs the notify and purge activities until cancelled.
pub struct Scheduler {
    storage: Arc<dyn EventStorage>,
    notifier: Arc<dyn Notifier>,
    config: SchedulerConfig,
    tracker: TaskTracker,
    running: Mutex<Option<CancellationToken>>,
}

impl Scheduler {
    pub fn new(
        storage: Arc<dyn EventStorage>,
        notifier: Arc<dyn Notifier>,
        config: SchedulerConfig,
    ) -> Self {
        let tracker = TaskTracker::new();
        tracker.close();

        Self {
            storage,
            notifier,
            config,
            tracker,
            running: Mutex::new(None),
        }
    }

    /// Start both activities unless they are already running.
    ///
    /// Returns immediately. Cancelling `token` stops both activities; a
    /// later call starts them again.
    pub fn schedule(&self, token: &CancellationToken) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);

        if running.as_ref().is_some_and(|active| !active.is_cancelled()) {
            debug!("Scheduler already running");
            return;
        }

        let token = token.child_token();
        self.tracker.reopen();

        let notify = NotifyActivity {
            storage: self.storage.clone(),
            notifier: self.notifier.clone(),
            watermark: NotifyWatermark::new(),
            period: to_time_delta(self.config.notify_interval),
        };
        self.spawn_periodic(token.clone(), self.config.notify_interval, notify);

        let purge = PurgeActivity {
            storage: self.storage.clone(),
            older_than: to_time_delta(self.config.purge_older_than),
        };
        self.spawn_periodic(token.clone(), self.config.purge_interval, purge);

        self.tracker.close();
        *running = Some(token);

        info!(
            notify_interval = ?self.config.notify_interval,
            purge_interval = ?self.config.purge_interval,
            purge_older_than = ?self.config.purge_older_than,
            "Scheduler started"
        );
    }

    /// Wait until every started activity has stopped.
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }

    fn spawn_periodic<A: Activity>(
        &self,
        token: CancellationToken,
        period: Duration,
        mut activity: A,
    ) {
        self.tracker.spawn(async move {
            let mut ticker = time::interval(period.max(MIN_PERIOD));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => activity.tick().await,
                }
            }

            info!(activity = activity.name(), "Scheduler activity stopped");
        });
    }
}

fn to_time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

#[cfg(test)]
mod tests;
