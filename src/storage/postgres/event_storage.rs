//! PostgreSQL EventStorage implementation.
//!
//! The no-overlap invariant is enforced by the database itself: an
//! exclusion constraint over `(owner_id WITH =, time WITH &&)` rejects any
//! write that would make two of an owner's `tstzrange` values intersect.
//! Constraint violations are mapped back to domain errors by constraint
//! name.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Alias, Expr, PostgresQueryBuilder, Query};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::model::{Event, EventId, ModelError, OwnerId, Title};
use crate::storage::schema::Events;
use crate::storage::{EventStorage, Result, StorageError};

/// Unique constraint on `(owner_id, event_id)`.
const UNIQUE_EVENT_CONSTRAINT: &str = "uniq_owner_event_id";
/// Exclusion constraint on overlapping intervals of one owner.
const NO_OVERLAP_CONSTRAINT: &str = "no_time_overlap";

/// Columns selected for every event read, in `decode_event` order.
const EVENT_COLUMNS: &str = "event_id, owner_id, lower(time) AS start_at, upper(time) AS end_at, \
     title, description, notify_before";

/// Notify instant of a row. Days are counted as 24 hours, independent of
/// the session time zone.
const NOTIFY_AT: &str = "lower(time) - make_interval(hours => notify_before * 24)";

/// PostgreSQL implementation of EventStorage.
pub struct PostgresEventStorage {
    pool: PgPool,
}

impl PostgresEventStorage {
    /// Create a new PostgreSQL event storage.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations/postgres")
            .run(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EventStorage for PostgresEventStorage {
    async fn add_event(&self, event: Event) -> Result<()> {
        sqlx::query(
            "INSERT INTO events (event_id, owner_id, time, title, description, notify_before) \
             VALUES ($1, $2, tstzrange($3, $4), $5, $6, $7)",
        )
        .bind(event.event_id().as_uuid())
        .bind(event.owner_id().as_uuid())
        .bind(event.start_at())
        .bind(event.end_at())
        .bind(event.title.as_str())
        .bind(event.description())
        .bind(i32::from(event.notify_before))
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &event))?;

        Ok(())
    }

    async fn update_event(&self, event: Event) -> Result<()> {
        // A single statement: on constraint violation the row is untouched.
        let result = sqlx::query(
            "UPDATE events \
             SET time = tstzrange($3, $4), title = $5, description = $6, notify_before = $7 \
             WHERE owner_id = $1 AND event_id = $2",
        )
        .bind(event.owner_id().as_uuid())
        .bind(event.event_id().as_uuid())
        .bind(event.start_at())
        .bind(event.end_at())
        .bind(event.title.as_str())
        .bind(event.description())
        .bind(i32::from(event.notify_before))
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &event))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(event.owner_id(), event.event_id()));
        }

        Ok(())
    }

    async fn find_event(&self, owner_id: OwnerId, event_id: EventId) -> Result<Event> {
        let query = Query::select()
            .columns([Events::EventId, Events::OwnerId])
            .expr_as(Expr::cust("lower(time)"), Alias::new("start_at"))
            .expr_as(Expr::cust("upper(time)"), Alias::new("end_at"))
            .columns([Events::Title, Events::Description, Events::NotifyBefore])
            .from(Events::Table)
            .and_where(Expr::col(Events::OwnerId).eq(owner_id.to_string()))
            .and_where(Expr::col(Events::EventId).eq(event_id.to_string()))
            .to_string(PostgresQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;

        match row {
            Some(row) => decode_event(&row),
            None => Err(StorageError::not_found(owner_id, event_id)),
        }
    }

    async fn delete_event(&self, owner_id: OwnerId, event_id: EventId) -> Result<()> {
        let query = Query::delete()
            .from_table(Events::Table)
            .and_where(Expr::col(Events::OwnerId).eq(owner_id.to_string()))
            .and_where(Expr::col(Events::EventId).eq(event_id.to_string()))
            .to_string(PostgresQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(owner_id, event_id));
        }

        Ok(())
    }

    async fn query_events(
        &self,
        owner_id: OwnerId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        // tstzrange rejects a lower bound above the upper one.
        if from >= to {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE owner_id = $1 AND time && tstzrange($2, $3) \
             ORDER BY lower(time)"
        );

        let rows = sqlx::query(&query)
            .bind(owner_id.as_uuid())
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_event).collect()
    }

    async fn purge_old_events(&self, older_than: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("DELETE FROM events WHERE upper(time) < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;

        debug!(
            purged = result.rows_affected(),
            older_than = %older_than,
            "Purged old events"
        );
        Ok(())
    }

    async fn query_events_to_notify(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE notify_before > 0 AND {NOTIFY_AT} >= $1 AND {NOTIFY_AT} < $2 \
             ORDER BY {NOTIFY_AT}, owner_id, event_id"
        );

        let rows = sqlx::query(&query)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_event).collect()
    }
}

/// Map a failed write to a domain error by the violated constraint.
fn map_write_error(err: sqlx::Error, event: &Event) -> StorageError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.constraint() {
            Some(UNIQUE_EVENT_CONSTRAINT) => return StorageError::already_exists(event),
            Some(NO_OVERLAP_CONSTRAINT) => return StorageError::time_is_busy(event),
            _ => {}
        }
    }
    StorageError::Database(err)
}

/// Rebuild a validated `Event` from a row.
fn decode_event(row: &PgRow) -> Result<Event> {
    let event_id: Uuid = row.try_get("event_id")?;
    let owner_id: Uuid = row.try_get("owner_id")?;
    let start_at: DateTime<Utc> = row.try_get("start_at")?;
    let end_at: DateTime<Utc> = row.try_get("end_at")?;
    let title: String = row.try_get("title")?;
    let description: Option<String> = row.try_get("description")?;
    let notify_before: i32 = row.try_get("notify_before")?;

    let notify_before = u16::try_from(notify_before)
        .map_err(|_| ModelError::NotifyBeforeOutOfRange(i64::from(notify_before)))?;

    let mut event = Event::new(
        EventId::from(event_id),
        OwnerId::from(owner_id),
        Title::new(title)?,
        start_at,
        end_at,
    )?
    .with_notify_before(notify_before);
    if let Some(description) = description {
        event.set_description(description);
    }

    Ok(event)
}
