//! Calendar event and its identifiers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ModelError;

/// Maximum title length in bytes.
pub const MAX_TITLE_LEN: usize = 128;

/// Event identifier. Unique only within an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Result<Self, ModelError> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|e| ModelError::InvalidEventId {
                value: value.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for EventId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for EventId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Calendar owner identifier. Scoping unit for the no-overlap invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(Uuid);

impl OwnerId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Result<Self, ModelError> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|e| ModelError::InvalidOwnerId {
                value: value.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for OwnerId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for OwnerId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Event title: non-empty, at most [`MAX_TITLE_LEN`] bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Title(String);

impl Title {
    pub fn new(title: impl Into<String>) -> Result<Self, ModelError> {
        let title = title.into();
        if title.is_empty() {
            return Err(ModelError::EmptyTitle);
        }
        if title.len() > MAX_TITLE_LEN {
            return Err(ModelError::TitleTooLong {
                len: title.len(),
                max: MAX_TITLE_LEN,
            });
        }
        Ok(Self(title))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Title {
    type Error = ModelError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for Title {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An event scheduled over the half-open interval `[start_at, end_at)`.
///
/// Timestamps are truncated to whole microseconds on construction.
///
/// Identity and interval are fixed at construction; an update replaces the
/// whole event in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    event_id: EventId,
    owner_id: OwnerId,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    pub title: Title,
    description: Option<String>,
    /// Days before `start_at` at which to notify. 0 disables notification.
    pub notify_before: u16,
}

impl Event {
    pub fn new(
        event_id: EventId,
        owner_id: OwnerId,
        title: Title,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<Self, ModelError> {
        // Microsecond precision is what the persistent engine stores.
        let start_at = start_at.trunc_subsecs(6);
        let end_at = end_at.trunc_subsecs(6);
        if start_at >= end_at {
            return Err(ModelError::EndBeforeStart {
                start_at: start_at.to_rfc3339(),
                end_at: end_at.to_rfc3339(),
            });
        }

        Ok(Self {
            event_id,
            owner_id,
            start_at,
            end_at,
            title,
            description: None,
            notify_before: 0,
        })
    }

    /// Set the description. An empty string clears it.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.set_description(description);
        self
    }

    pub fn with_notify_before(mut self, days: u16) -> Self {
        self.notify_before = days;
        self
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        let description = description.into();
        self.description = (!description.is_empty()).then_some(description);
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    pub fn start_at(&self) -> DateTime<Utc> {
        self.start_at
    }

    pub fn end_at(&self) -> DateTime<Utc> {
        self.end_at
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Whether `[start_at, end_at)` overlaps `[from, to)`.
    ///
    /// Touching boundaries do not overlap.
    pub fn overlaps(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.start_at < to && from < self.end_at
    }

    /// Instant at which the notification should fire, if any.
    ///
    /// `None` when `notify_before` is 0 or the notify time would precede
    /// the earliest representable instant.
    pub fn notify_at(&self) -> Option<DateTime<Utc>> {
        if self.notify_before == 0 {
            return None;
        }
        self.start_at
            .checked_sub_signed(Duration::days(i64::from(self.notify_before)))
    }
}
