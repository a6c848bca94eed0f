//! Database schema definitions using sea-query.
//!
//! Column identifiers for the `events` table.

use sea_query::Iden;

/// Events table schema.
///
/// `time` is a `tstzrange` holding `[start_at, end_at)`.
#[derive(Iden)]
pub enum Events {
    Table,
    #[iden = "event_id"]
    EventId,
    #[iden = "owner_id"]
    OwnerId,
    #[iden = "time"]
    Time,
    #[iden = "title"]
    Title,
    #[iden = "description"]
    Description,
    #[iden = "notify_before"]
    NotifyBefore,
}
