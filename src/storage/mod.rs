//! Event storage.
//!
//! This module contains:
//! - `EventStorage` trait: the contract every backend honours
//! - `StorageError` / `ErrorKind`: error taxonomy shared by all backends
//! - Storage configuration types and the `init_storage` factory
//! - Implementations: in-memory, PostgreSQL, Mock

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::model::{Event, EventId, ModelError, OwnerId};

pub mod memory;
pub mod mock;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "postgres")]
pub mod schema;

pub use memory::MemoryEventStorage;
pub use mock::MockEventStorage;
#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStorage;

// ============================================================================
// Errors
// ============================================================================

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Coarse classification of storage failures.
///
/// Callers map these to externally visible outcomes without matching on
/// every backend-specific variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Expected outcome of a concurrent or overlapping write.
    Conflict,
    /// Referenced event does not exist.
    NotFound,
    /// Stored or supplied data failed model validation.
    Validation,
    /// An update failed and the previous state could not be restored.
    Inconsistent,
    /// Database or connection failure.
    Infrastructure,
}

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("event already exists: owner={owner_id}, event={event_id}")]
    AlreadyExists { owner_id: OwnerId, event_id: EventId },

    #[error("time is busy: owner={owner_id}, event={event_id}")]
    TimeIsBusy { owner_id: OwnerId, event_id: EventId },

    #[error("event not found: owner={owner_id}, event={event_id}")]
    NotFound { owner_id: OwnerId, event_id: EventId },

    #[error("can't add updated event {event_id}: {source}; can't revert: {rollback}")]
    UpdateRollback {
        event_id: EventId,
        #[source]
        source: Box<StorageError>,
        rollback: Box<StorageError>,
    },

    #[error("invalid stored event: {0}")]
    InvalidEvent(#[from] ModelError),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "postgres")]
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::AlreadyExists { .. } | StorageError::TimeIsBusy { .. } => {
                ErrorKind::Conflict
            }
            StorageError::NotFound { .. } => ErrorKind::NotFound,
            StorageError::UpdateRollback { .. } => ErrorKind::Inconsistent,
            StorageError::InvalidEvent(_) => ErrorKind::Validation,
            StorageError::Unavailable(_) => ErrorKind::Infrastructure,
            #[cfg(feature = "postgres")]
            StorageError::Database(_) | StorageError::Migration(_) => ErrorKind::Infrastructure,
        }
    }

    pub(crate) fn already_exists(event: &Event) -> Self {
        StorageError::AlreadyExists {
            owner_id: event.owner_id(),
            event_id: event.event_id(),
        }
    }

    pub(crate) fn time_is_busy(event: &Event) -> Self {
        StorageError::TimeIsBusy {
            owner_id: event.owner_id(),
            event_id: event.event_id(),
        }
    }

    pub(crate) fn not_found(owner_id: OwnerId, event_id: EventId) -> Self {
        StorageError::NotFound { owner_id, event_id }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Interface for calendar event persistence.
///
/// For a given owner no two stored events overlap on `[start_at, end_at)`.
/// Touching boundaries are allowed.
///
/// Implementations:
/// - `MemoryEventStorage`: in-memory reference engine
/// - `PostgresEventStorage`: PostgreSQL with an exclusion constraint
/// - `MockEventStorage`: failure-injecting wrapper for tests
#[async_trait]
pub trait EventStorage: Send + Sync {
    /// Store a new event.
    ///
    /// Fails with `AlreadyExists` when `(owner_id, event_id)` is taken and
    /// with `TimeIsBusy` when the interval overlaps another of the owner's
    /// events.
    async fn add_event(&self, event: Event) -> Result<()>;

    /// Replace the event with the same `(owner_id, event_id)`.
    ///
    /// Atomic: on failure the previous event remains stored unchanged.
    async fn update_event(&self, event: Event) -> Result<()>;

    async fn find_event(&self, owner_id: OwnerId, event_id: EventId) -> Result<Event>;

    async fn delete_event(&self, owner_id: OwnerId, event_id: EventId) -> Result<()>;

    /// Events of `owner_id` overlapping `[from, to)`, ordered by `start_at`.
    ///
    /// Unknown owners yield an empty list.
    async fn query_events(
        &self,
        owner_id: OwnerId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>>;

    /// Delete, across all owners, every event with `end_at < older_than`.
    async fn purge_old_events(&self, older_than: DateTime<Utc>) -> Result<()>;

    /// Events of all owners whose notify time falls in `[from, to)`.
    ///
    /// Events with `notify_before == 0` are never returned.
    async fn query_events_to_notify(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Storage type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Memory,
    Postgres,
}

/// Storage configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type discriminator.
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// PostgreSQL-specific configuration.
    pub postgres: PostgresConfig,
}

/// PostgreSQL-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// PostgreSQL connection URI.
    pub uri: String,
    /// Pool size.
    pub max_connections: u32,
    /// Run embedded migrations on startup.
    pub migrate: bool,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            uri: "postgres://localhost:5432/calendar".to_string(),
            max_connections: 10,
            migrate: true,
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize storage based on configuration.
///
/// Connection failures are returned to the caller; a process should not
/// start with a dead database.
pub async fn init_storage(
    config: &StorageConfig,
) -> std::result::Result<Arc<dyn EventStorage>, Box<dyn std::error::Error + Send + Sync>> {
    match config.storage_type {
        StorageType::Memory => {
            info!(storage_type = "memory", "Event storage initialized");
            Ok(Arc::new(MemoryEventStorage::new()))
        }
        StorageType::Postgres => {
            #[cfg(feature = "postgres")]
            {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(config.postgres.max_connections)
                    .connect(&config.postgres.uri)
                    .await?;

                let storage = PostgresEventStorage::new(pool);
                if config.postgres.migrate {
                    storage.migrate().await?;
                }

                info!(storage_type = "postgres", "Event storage initialized");
                Ok(Arc::new(storage))
            }

            #[cfg(not(feature = "postgres"))]
            {
                Err("PostgreSQL support requires the 'postgres' feature. Rebuild with --features postgres".into())
            }
        }
    }
}
