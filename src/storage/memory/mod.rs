//! In-memory event storage.
//!
//! Reference engine. Each owner's events live in a `Vec` sorted by
//! `start_at`; since intervals never overlap, the vector is sorted by
//! `end_at` too, so every interval query resolves to a contiguous slice
//! found by binary search.
//!
//! ## Locking
//!
//! One `RwLock` guards the whole owner map. Reads (`find_event`,
//! `query_events`, `query_events_to_notify`) share it; writes (`add_event`,
//! `update_event`, `delete_event`, `purge_old_events`) hold it exclusively
//! for the full operation, including the compensating re-insert of an
//! update. Callers only ever receive clones.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::{EventStorage, Result, StorageError};
use crate::model::{Event, EventId, OwnerId};

/// Events of one owner, ordered by `start_at`.
type OwnerEvents = Vec<Event>;

/// In-memory implementation of EventStorage.
#[derive(Default)]
pub struct MemoryEventStorage {
    owners: RwLock<HashMap<OwnerId, OwnerEvents>>,
}

impl MemoryEventStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of an owner's full collection, in storage order.
    pub async fn owner_events(&self, owner_id: OwnerId) -> Vec<Event> {
        self.owners
            .read()
            .await
            .get(&owner_id)
            .cloned()
            .unwrap_or_default()
    }

    fn add_locked(owners: &mut HashMap<OwnerId, OwnerEvents>, event: Event) -> Result<()> {
        let events = owners.entry(event.owner_id()).or_default();

        if position(events, event.event_id()).is_some() {
            return Err(StorageError::already_exists(&event));
        }

        let Some(index) = insertion_point(events, &event) else {
            return Err(StorageError::time_is_busy(&event));
        };

        events.insert(index, event);
        Ok(())
    }

    fn remove_locked(
        owners: &mut HashMap<OwnerId, OwnerEvents>,
        owner_id: OwnerId,
        event_id: EventId,
    ) -> Result<Event> {
        let events = owners
            .get_mut(&owner_id)
            .ok_or_else(|| StorageError::not_found(owner_id, event_id))?;

        let index =
            position(events, event_id).ok_or_else(|| StorageError::not_found(owner_id, event_id))?;

        let removed = events.remove(index);
        if events.is_empty() {
            owners.remove(&owner_id);
        }

        Ok(removed)
    }
}

#[async_trait]
impl EventStorage for MemoryEventStorage {
    async fn add_event(&self, event: Event) -> Result<()> {
        let mut owners = self.owners.write().await;
        Self::add_locked(&mut owners, event)
    }

    async fn update_event(&self, event: Event) -> Result<()> {
        let mut owners = self.owners.write().await;

        let previous = Self::remove_locked(&mut owners, event.owner_id(), event.event_id())?;
        let event_id = previous.event_id();

        match Self::add_locked(&mut owners, event) {
            Ok(()) => Ok(()),
            Err(err) => {
                debug!(
                    owner_id = %previous.owner_id(),
                    event_id = %event_id,
                    error = %err,
                    "Update rejected, restoring previous event"
                );
                let revert = Self::add_locked(&mut owners, previous);
                Err(compensate(event_id, err, revert))
            }
        }
    }

    async fn find_event(&self, owner_id: OwnerId, event_id: EventId) -> Result<Event> {
        let owners = self.owners.read().await;
        owners
            .get(&owner_id)
            .and_then(|events| position(events, event_id).map(|i| events[i].clone()))
            .ok_or_else(|| StorageError::not_found(owner_id, event_id))
    }

    async fn delete_event(&self, owner_id: OwnerId, event_id: EventId) -> Result<()> {
        let mut owners = self.owners.write().await;
        Self::remove_locked(&mut owners, owner_id, event_id).map(|_| ())
    }

    async fn query_events(
        &self,
        owner_id: OwnerId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let owners = self.owners.read().await;
        Ok(owners
            .get(&owner_id)
            .map(|events| overlapping(events, from, to).to_vec())
            .unwrap_or_default())
    }

    async fn purge_old_events(&self, older_than: DateTime<Utc>) -> Result<()> {
        let mut owners = self.owners.write().await;

        let mut purged = 0usize;
        for events in owners.values_mut() {
            // Sorted by end_at as well, so expired events form a prefix.
            let expired = events.partition_point(|e| e.end_at() < older_than);
            events.drain(..expired);
            purged += expired;
        }
        owners.retain(|_, events| !events.is_empty());

        debug!(purged, older_than = %older_than, "Purged old events");
        Ok(())
    }

    async fn query_events_to_notify(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let owners = self.owners.read().await;

        let mut due: Vec<Event> = owners
            .values()
            .flatten()
            .filter(|e| matches!(e.notify_at(), Some(at) if from <= at && at < to))
            .cloned()
            .collect();
        due.sort_by_key(|e| (e.notify_at(), e.owner_id(), e.event_id()));

        Ok(due)
    }
}

/// Combine a failed add with the outcome of restoring the previous event.
///
/// A successful restore reports the original failure unchanged so its kind
/// stays visible. A failed restore reports both.
fn compensate(event_id: EventId, err: StorageError, revert: Result<()>) -> StorageError {
    match revert {
        Ok(()) => err,
        Err(rollback) => StorageError::UpdateRollback {
            event_id,
            source: Box::new(err),
            rollback: Box::new(rollback),
        },
    }
}

fn position(events: &[Event], event_id: EventId) -> Option<usize> {
    events.iter().position(|e| e.event_id() == event_id)
}

/// Index at which `event` can be inserted without overlapping a neighbour.
///
/// The event before the index must end at or before the new start and the
/// event at the index must start at or after the new end.
fn insertion_point(events: &[Event], event: &Event) -> Option<usize> {
    let k = events.partition_point(|e| e.start_at() <= event.start_at());

    let fits_before = k == 0 || events[k - 1].end_at() <= event.start_at();
    let fits_after = k == events.len() || events[k].start_at() >= event.end_at();

    (fits_before && fits_after).then_some(k)
}

/// Contiguous run of `events` overlapping `[from, to)`.
fn overlapping(events: &[Event], from: DateTime<Utc>, to: DateTime<Utc>) -> &[Event] {
    let lo = events.partition_point(|e| e.end_at() <= from);
    let hi = events.partition_point(|e| e.start_at() < to);
    if lo < hi {
        &events[lo..hi]
    } else {
        &[]
    }
}
