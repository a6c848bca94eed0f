//! Notification: ephemeral projection of an event.

use chrono::{DateTime, Utc};

use super::{Event, EventId, OwnerId, Title};

/// A notification about an upcoming event.
///
/// Never persisted on its own; the originating event is the source of truth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub event_id: EventId,
    pub owner_id: OwnerId,
    pub title: Title,
    /// When the notification is due: `start_at - notify_before` days.
    pub date: DateTime<Utc>,
}

impl Notification {
    pub fn from_event(event: &Event) -> Self {
        Self {
            event_id: event.event_id(),
            owner_id: event.owner_id(),
            title: event.title.clone(),
            date: event.notify_at().unwrap_or_else(|| event.start_at()),
        }
    }
}
