//! Mock storage implementation for testing.
//!
//! Wraps the in-memory engine, records the scheduler-facing calls and can
//! be told to fail them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{EventStorage, MemoryEventStorage, Result, StorageError};
use crate::model::{Event, EventId, OwnerId};

/// Mock event storage backed by `MemoryEventStorage`.
#[derive(Default)]
pub struct MockEventStorage {
    inner: MemoryEventStorage,
    fail_on_notify_query: RwLock<bool>,
    fail_on_purge: RwLock<bool>,
    notify_queries: RwLock<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    purges: RwLock<Vec<DateTime<Utc>>>,
}

impl MockEventStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_notify_query(&self, fail: bool) {
        *self.fail_on_notify_query.write().await = fail;
    }

    pub async fn set_fail_on_purge(&self, fail: bool) {
        *self.fail_on_purge.write().await = fail;
    }

    /// Windows passed to `query_events_to_notify`, failed calls included.
    pub async fn notify_queries(&self) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        self.notify_queries.read().await.clone()
    }

    /// Cutoffs passed to `purge_old_events`, failed calls included.
    pub async fn purges(&self) -> Vec<DateTime<Utc>> {
        self.purges.read().await.clone()
    }
}

#[async_trait]
impl EventStorage for MockEventStorage {
    async fn add_event(&self, event: Event) -> Result<()> {
        self.inner.add_event(event).await
    }

    async fn update_event(&self, event: Event) -> Result<()> {
        self.inner.update_event(event).await
    }

    async fn find_event(&self, owner_id: OwnerId, event_id: EventId) -> Result<Event> {
        self.inner.find_event(owner_id, event_id).await
    }

    async fn delete_event(&self, owner_id: OwnerId, event_id: EventId) -> Result<()> {
        self.inner.delete_event(owner_id, event_id).await
    }

    async fn query_events(
        &self,
        owner_id: OwnerId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        self.inner.query_events(owner_id, from, to).await
    }

    async fn purge_old_events(&self, older_than: DateTime<Utc>) -> Result<()> {
        self.purges.write().await.push(older_than);
        if *self.fail_on_purge.read().await {
            return Err(StorageError::Unavailable("mock purge failure".to_string()));
        }
        self.inner.purge_old_events(older_than).await
    }

    async fn query_events_to_notify(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        self.notify_queries.write().await.push((from, to));
        if *self.fail_on_notify_query.read().await {
            return Err(StorageError::Unavailable(
                "mock notify query failure".to_string(),
            ));
        }
        self.inner.query_events_to_notify(from, to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ErrorKind;

    #[tokio::test]
    async fn test_mock_records_and_fails_purge() {
        let storage = MockEventStorage::new();
        let cutoff = Utc::now();

        storage.purge_old_events(cutoff).await.unwrap();
        storage.set_fail_on_purge(true).await;
        let err = storage.purge_old_events(cutoff).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert_eq!(storage.purges().await, vec![cutoff, cutoff]);
    }

    #[tokio::test]
    async fn test_mock_records_notify_queries() {
        let storage = MockEventStorage::new();
        let from = Utc::now();
        let to = from + chrono::Duration::minutes(1);

        storage.set_fail_on_notify_query(true).await;
        assert!(storage.query_events_to_notify(from, to).await.is_err());
        storage.set_fail_on_notify_query(false).await;
        assert!(storage.query_events_to_notify(from, to).await.unwrap().is_empty());

        assert_eq!(storage.notify_queries().await, vec![(from, to), (from, to)]);
    }
}
