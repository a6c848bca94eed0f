//! Mock notifier implementation for testing.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Notifier, NotifyError, Result};
use crate::model::Event;

/// Mock notifier that records every event it is asked to notify about.
#[derive(Default)]
pub struct MockNotifier {
    notified: RwLock<Vec<Event>>,
    fail_on_notify: RwLock<bool>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_notify(&self, fail: bool) {
        *self.fail_on_notify.write().await = fail;
    }

    pub async fn notified_count(&self) -> usize {
        self.notified.read().await.len()
    }

    pub async fn take_notified(&self) -> Vec<Event> {
        std::mem::take(&mut *self.notified.write().await)
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, event: &Event) -> Result<()> {
        if *self.fail_on_notify.read().await {
            return Err(NotifyError::Publish("Mock publish failure".to_string()));
        }
        self.notified.write().await.push(event.clone());
        Ok(())
    }
}
