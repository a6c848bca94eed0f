//! Calendar service.
//!
//! Business facade over `EventStorage`: event CRUD plus day, week and
//! month listings. Calendar boundaries are computed in UTC. Storage errors
//! are wrapped with the failing operation; `CalendarError::kind` keeps the
//! storage error kind visible.

use std::sync::Arc;

use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use tracing::debug;

use crate::model::{Event, EventId, OwnerId};
use crate::storage::{ErrorKind, EventStorage, StorageError};

/// Errors returned by the calendar service.
#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("can't {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: StorageError,
    },

    #[error("invalid month: {year}-{month}")]
    InvalidMonth { year: i32, month: u32 },

    #[error("date out of range: {0}")]
    DateOutOfRange(NaiveDate),
}

impl CalendarError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CalendarError::Storage { source, .. } => source.kind(),
            CalendarError::InvalidMonth { .. } | CalendarError::DateOutOfRange(_) => {
                ErrorKind::Validation
            }
        }
    }

    fn storage(operation: &'static str) -> impl FnOnce(StorageError) -> Self {
        move |source| CalendarError::Storage { operation, source }
    }
}

pub type Result<T> = std::result::Result<T, CalendarError>;

/// Calendar operations for request handlers.
#[derive(Clone)]
pub struct CalendarService {
    storage: Arc<dyn EventStorage>,
}

impl CalendarService {
    pub fn new(storage: Arc<dyn EventStorage>) -> Self {
        Self { storage }
    }

    pub async fn create_event(&self, event: Event) -> Result<()> {
        let (owner_id, event_id) = (event.owner_id(), event.event_id());
        self.storage
            .add_event(event)
            .await
            .map_err(CalendarError::storage("create event"))?;
        debug!(owner_id = %owner_id, event_id = %event_id, "Event created");
        Ok(())
    }

    pub async fn update_event(&self, event: Event) -> Result<()> {
        let (owner_id, event_id) = (event.owner_id(), event.event_id());
        self.storage
            .update_event(event)
            .await
            .map_err(CalendarError::storage("update event"))?;
        debug!(owner_id = %owner_id, event_id = %event_id, "Event updated");
        Ok(())
    }

    pub async fn delete_event(&self, owner_id: OwnerId, event_id: EventId) -> Result<()> {
        self.storage
            .delete_event(owner_id, event_id)
            .await
            .map_err(CalendarError::storage("delete event"))?;
        debug!(owner_id = %owner_id, event_id = %event_id, "Event deleted");
        Ok(())
    }

    pub async fn find_event(&self, owner_id: OwnerId, event_id: EventId) -> Result<Event> {
        self.storage
            .find_event(owner_id, event_id)
            .await
            .map_err(CalendarError::storage("find event"))
    }

    /// Events overlapping the UTC day `date`.
    pub async fn day_events(&self, owner_id: OwnerId, date: NaiveDate) -> Result<Vec<Event>> {
        let from = start_of(date);
        let to = start_of(add_days(date, 1)?);
        self.list(owner_id, from, to, "get day events").await
    }

    /// Events overlapping the seven UTC days starting at `date`.
    pub async fn week_events(&self, owner_id: OwnerId, date: NaiveDate) -> Result<Vec<Event>> {
        let from = start_of(date);
        let to = start_of(add_days(date, 7)?);
        self.list(owner_id, from, to, "get week events").await
    }

    /// Events overlapping the UTC calendar month.
    pub async fn month_events(&self, owner_id: OwnerId, year: i32, month: u32) -> Result<Vec<Event>> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or(CalendarError::InvalidMonth { year, month })?;
        let next = first
            .checked_add_months(Months::new(1))
            .ok_or(CalendarError::DateOutOfRange(first))?;
        self.list(owner_id, start_of(first), start_of(next), "get month events")
            .await
    }

    async fn list(
        &self,
        owner_id: OwnerId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        operation: &'static str,
    ) -> Result<Vec<Event>> {
        self.storage
            .query_events(owner_id, from, to)
            .await
            .map_err(CalendarError::storage(operation))
    }
}

fn start_of(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

fn add_days(date: NaiveDate, days: u64) -> Result<NaiveDate> {
    date.checked_add_days(Days::new(days))
        .ok_or(CalendarError::DateOutOfRange(date))
}
