//! Calendar domain model.
//!
//! Values are validated at construction: an `Event` that exists always has a
//! non-empty bounded title and `start_at < end_at`. Storage backends never see
//! unvalidated input.

mod event;
mod notification;

pub use event::{Event, EventId, OwnerId, Title, MAX_TITLE_LEN};
pub use notification::Notification;

/// Validation errors raised while building model values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("invalid event ID '{value}': {reason}")]
    InvalidEventId { value: String, reason: String },

    #[error("invalid owner ID '{value}': {reason}")]
    InvalidOwnerId { value: String, reason: String },

    #[error("empty title")]
    EmptyTitle,

    #[error("title is too long: {len} bytes, max {max}")]
    TitleTooLong { len: usize, max: usize },

    #[error("notify_before out of range: {0} days")]
    NotifyBeforeOutOfRange(i64),

    #[error("the end_at ({end_at}) is not after start_at ({start_at})")]
    EndBeforeStart { start_at: String, end_at: String },
}
