//! EventStorage interface tests.
//!
//! These tests verify the contract of the EventStorage trait.
//! Each storage implementation should run these tests. Backends may share
//! state between tests, so every test uses fresh owners and only asserts on
//! events it created.

use chrono::{DateTime, Duration, TimeZone, Utc};

use calendar::model::{Event, EventId, OwnerId, Title};
use calendar::storage::{ErrorKind, EventStorage, StorageError};

/// Whole-second instant, representable by every backend.
pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

/// Create an event for `owner_id` over `[start, end)`.
pub fn make_event(owner_id: OwnerId, start: DateTime<Utc>, end: DateTime<Utc>) -> Event {
    Event::new(
        EventId::new(),
        owner_id,
        Title::new("meeting").unwrap(),
        start,
        end,
    )
    .unwrap()
}

fn ids(events: &[Event]) -> Vec<EventId> {
    events.iter().map(Event::event_id).collect()
}

// =============================================================================
// add / find
// =============================================================================

pub async fn test_add_and_find_round_trip<S: EventStorage>(storage: &S) {
    let owner = OwnerId::new();
    let event = make_event(owner, at(2030, 1, 10, 9, 0), at(2030, 1, 10, 10, 0))
        .with_description("quarterly review")
        .with_notify_before(2);

    storage
        .add_event(event.clone())
        .await
        .expect("add should succeed");

    let found = storage
        .find_event(owner, event.event_id())
        .await
        .expect("find should succeed");
    assert_eq!(found, event, "stored event should round trip unchanged");
}

pub async fn test_sub_microsecond_round_trip<S: EventStorage>(storage: &S) {
    let owner = OwnerId::new();
    let start = at(2030, 1, 11, 9, 0);
    let event = make_event(
        owner,
        start + Duration::nanoseconds(1_500),
        at(2030, 1, 11, 10, 0) + Duration::nanoseconds(700),
    );
    assert_eq!(event.start_at(), start + Duration::microseconds(1));

    storage
        .add_event(event.clone())
        .await
        .expect("add should succeed");
    let found = storage
        .find_event(owner, event.event_id())
        .await
        .expect("find should succeed");
    assert_eq!(found, event, "stored event should round trip unchanged");

    // Both ends collapse to the same microsecond, so the events touch.
    let next = make_event(
        owner,
        at(2030, 1, 11, 10, 0) + Duration::nanoseconds(300),
        at(2030, 1, 11, 11, 0),
    );
    storage
        .add_event(next)
        .await
        .expect("touching event should be accepted");
}

pub async fn test_add_overlapping_is_busy<S: EventStorage>(storage: &S) {
    let owner = OwnerId::new();
    let first = make_event(owner, at(2030, 2, 1, 9, 0), at(2030, 2, 1, 11, 0));
    storage.add_event(first.clone()).await.unwrap();

    let overlapping = make_event(owner, at(2030, 2, 1, 10, 0), at(2030, 2, 1, 12, 0));
    let err = storage
        .add_event(overlapping.clone())
        .await
        .expect_err("overlapping add should fail");
    assert!(
        matches!(err, StorageError::TimeIsBusy { .. }),
        "expected TimeIsBusy, got {err}"
    );
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let inside = make_event(owner, at(2030, 2, 1, 9, 30), at(2030, 2, 1, 10, 30));
    assert!(matches!(
        storage.add_event(inside).await,
        Err(StorageError::TimeIsBusy { .. })
    ));

    let stored = storage
        .query_events(owner, at(2030, 2, 1, 0, 0), at(2030, 2, 2, 0, 0))
        .await
        .unwrap();
    assert_eq!(ids(&stored), vec![first.event_id()], "rejected events are not stored");
}

pub async fn test_owners_are_isolated<S: EventStorage>(storage: &S) {
    let alice = OwnerId::new();
    let bob = OwnerId::new();
    let start = at(2030, 3, 1, 9, 0);
    let end = at(2030, 3, 1, 10, 0);

    storage.add_event(make_event(alice, start, end)).await.unwrap();
    storage
        .add_event(make_event(bob, start, end))
        .await
        .expect("same interval for another owner should succeed");

    let alice_events = storage.query_events(alice, start, end).await.unwrap();
    let bob_events = storage.query_events(bob, start, end).await.unwrap();
    assert_eq!(alice_events.len(), 1);
    assert_eq!(bob_events.len(), 1);
    assert_eq!(alice_events[0].owner_id(), alice);
    assert_eq!(bob_events[0].owner_id(), bob);
}

pub async fn test_touching_boundaries_allowed<S: EventStorage>(storage: &S) {
    let owner = OwnerId::new();
    let middle = make_event(owner, at(2030, 4, 1, 10, 0), at(2030, 4, 1, 11, 0));
    let before = make_event(owner, at(2030, 4, 1, 9, 0), at(2030, 4, 1, 10, 0));
    let after = make_event(owner, at(2030, 4, 1, 11, 0), at(2030, 4, 1, 12, 0));

    storage.add_event(middle).await.unwrap();
    storage
        .add_event(before)
        .await
        .expect("event ending at another's start should succeed");
    storage
        .add_event(after)
        .await
        .expect("event starting at another's end should succeed");
}

pub async fn test_add_duplicate_id_already_exists<S: EventStorage>(storage: &S) {
    let owner = OwnerId::new();
    let event = make_event(owner, at(2030, 5, 1, 9, 0), at(2030, 5, 1, 10, 0));
    storage.add_event(event.clone()).await.unwrap();

    let duplicate = Event::new(
        event.event_id(),
        owner,
        Title::new("elsewhere").unwrap(),
        at(2030, 5, 2, 9, 0),
        at(2030, 5, 2, 10, 0),
    )
    .unwrap();
    let err = storage
        .add_event(duplicate)
        .await
        .expect_err("duplicate id should fail");
    assert!(
        matches!(err, StorageError::AlreadyExists { .. }),
        "expected AlreadyExists, got {err}"
    );
}

pub async fn test_find_missing_not_found<S: EventStorage>(storage: &S) {
    let err = storage
        .find_event(OwnerId::new(), EventId::new())
        .await
        .expect_err("find of unknown event should fail");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// =============================================================================
// update / delete
// =============================================================================

pub async fn test_update_replaces_event<S: EventStorage>(storage: &S) {
    let owner = OwnerId::new();
    let event = make_event(owner, at(2030, 6, 1, 9, 0), at(2030, 6, 1, 10, 0));
    storage.add_event(event.clone()).await.unwrap();

    let moved = Event::new(
        event.event_id(),
        owner,
        Title::new("moved").unwrap(),
        at(2030, 6, 1, 9, 30),
        at(2030, 6, 1, 11, 0),
    )
    .unwrap()
    .with_notify_before(1);
    storage
        .update_event(moved.clone())
        .await
        .expect("update overlapping only its own old interval should succeed");

    let found = storage.find_event(owner, event.event_id()).await.unwrap();
    assert_eq!(found, moved);
}

pub async fn test_update_conflict_keeps_original<S: EventStorage>(storage: &S) {
    let owner = OwnerId::new();
    let first = make_event(owner, at(2030, 7, 1, 9, 0), at(2030, 7, 1, 10, 0));
    let second = make_event(owner, at(2030, 7, 1, 11, 0), at(2030, 7, 1, 12, 0))
        .with_description("keep me");
    storage.add_event(first).await.unwrap();
    storage.add_event(second.clone()).await.unwrap();

    let clash = Event::new(
        second.event_id(),
        owner,
        Title::new("clash").unwrap(),
        at(2030, 7, 1, 9, 30),
        at(2030, 7, 1, 10, 30),
    )
    .unwrap();
    let err = storage
        .update_event(clash)
        .await
        .expect_err("update into a busy interval should fail");
    assert!(
        matches!(err, StorageError::TimeIsBusy { .. }),
        "expected TimeIsBusy, got {err}"
    );

    let found = storage.find_event(owner, second.event_id()).await.unwrap();
    assert_eq!(found, second, "failed update should leave the original in place");
}

pub async fn test_update_missing_not_found<S: EventStorage>(storage: &S) {
    let event = make_event(OwnerId::new(), at(2030, 8, 1, 9, 0), at(2030, 8, 1, 10, 0));
    let err = storage
        .update_event(event)
        .await
        .expect_err("update of unknown event should fail");
    assert!(matches!(err, StorageError::NotFound { .. }));
}

pub async fn test_delete_frees_interval<S: EventStorage>(storage: &S) {
    let owner = OwnerId::new();
    let event = make_event(owner, at(2030, 9, 1, 9, 0), at(2030, 9, 1, 10, 0));
    storage.add_event(event.clone()).await.unwrap();

    storage
        .delete_event(owner, event.event_id())
        .await
        .expect("delete should succeed");
    assert_eq!(
        storage
            .find_event(owner, event.event_id())
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );

    let replacement = make_event(owner, at(2030, 9, 1, 9, 0), at(2030, 9, 1, 10, 0));
    storage
        .add_event(replacement)
        .await
        .expect("deleted interval should be free again");

    let err = storage
        .delete_event(owner, event.event_id())
        .await
        .expect_err("second delete should fail");
    assert!(matches!(err, StorageError::NotFound { .. }));
}

// =============================================================================
// query_events
// =============================================================================

pub async fn test_query_overlapping_ordered<S: EventStorage>(storage: &S) {
    let owner = OwnerId::new();
    let late = make_event(owner, at(2030, 10, 1, 15, 0), at(2030, 10, 1, 16, 0));
    let early = make_event(owner, at(2030, 10, 1, 8, 0), at(2030, 10, 1, 10, 0));
    let noon = make_event(owner, at(2030, 10, 1, 12, 0), at(2030, 10, 1, 13, 0));
    let next_day = make_event(owner, at(2030, 10, 2, 9, 0), at(2030, 10, 2, 10, 0));
    for event in [&late, &early, &noon, &next_day] {
        storage.add_event(event.clone()).await.unwrap();
    }

    // Window starts inside `early` and ends exactly at `late`'s start.
    let events = storage
        .query_events(owner, at(2030, 10, 1, 9, 0), at(2030, 10, 1, 15, 0))
        .await
        .unwrap();
    assert_eq!(ids(&events), vec![early.event_id(), noon.event_id()]);

    let all = storage
        .query_events(owner, at(2030, 10, 1, 0, 0), at(2030, 10, 3, 0, 0))
        .await
        .unwrap();
    assert_eq!(
        ids(&all),
        vec![
            early.event_id(),
            noon.event_id(),
            late.event_id(),
            next_day.event_id()
        ],
        "events should be ordered by start"
    );
}

pub async fn test_query_unknown_owner_empty<S: EventStorage>(storage: &S) {
    let events = storage
        .query_events(OwnerId::new(), at(2000, 1, 1, 0, 0), at(2100, 1, 1, 0, 0))
        .await
        .expect("query for unknown owner should succeed");
    assert!(events.is_empty());
}

// =============================================================================
// query_events_to_notify
// =============================================================================

pub async fn test_notify_window<S: EventStorage>(storage: &S) {
    let alice = OwnerId::new();
    let bob = OwnerId::new();

    // Notify at 2031-01-09 09:00.
    let in_window = make_event(alice, at(2031, 1, 10, 9, 0), at(2031, 1, 10, 10, 0))
        .with_notify_before(1);
    // Notify at 2031-01-09 08:00, other owner.
    let earlier = make_event(bob, at(2031, 1, 12, 8, 0), at(2031, 1, 12, 9, 0))
        .with_notify_before(3);
    // Notify at 2031-01-09 10:00, the window's exclusive end.
    let at_end = make_event(alice, at(2031, 1, 11, 10, 0), at(2031, 1, 11, 11, 0))
        .with_notify_before(2);
    let silent = make_event(alice, at(2031, 1, 9, 9, 0), at(2031, 1, 9, 9, 30));
    for event in [&in_window, &earlier, &at_end, &silent] {
        storage.add_event(event.clone()).await.unwrap();
    }

    let events: Vec<Event> = storage
        .query_events_to_notify(at(2031, 1, 9, 8, 0), at(2031, 1, 9, 10, 0))
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.owner_id() == alice || e.owner_id() == bob)
        .collect();
    assert_eq!(
        ids(&events),
        vec![earlier.event_id(), in_window.event_id()],
        "notify window is half-open and ordered by notify time"
    );

    let next: Vec<Event> = storage
        .query_events_to_notify(at(2031, 1, 9, 10, 0), at(2031, 1, 9, 11, 0))
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.owner_id() == alice)
        .collect();
    assert_eq!(ids(&next), vec![at_end.event_id()]);
}

// =============================================================================
// purge_old_events
// =============================================================================

pub async fn test_purge_across_owners<S: EventStorage>(storage: &S) {
    let alice = OwnerId::new();
    let bob = OwnerId::new();
    let cutoff = at(1991, 1, 1, 0, 0);

    let alice_old = make_event(alice, at(1990, 3, 1, 9, 0), at(1990, 3, 1, 10, 0));
    let bob_old = make_event(bob, at(1990, 6, 1, 9, 0), at(1990, 6, 1, 10, 0));
    // Ends exactly at the cutoff, so it is kept.
    let alice_boundary = make_event(alice, at(1990, 12, 31, 23, 0), cutoff);
    let bob_recent = make_event(bob, at(1991, 2, 1, 9, 0), at(1991, 2, 1, 10, 0));
    for event in [&alice_old, &bob_old, &alice_boundary, &bob_recent] {
        storage.add_event(event.clone()).await.unwrap();
    }

    storage
        .purge_old_events(cutoff)
        .await
        .expect("purge should succeed");

    let range = (at(1980, 1, 1, 0, 0), at(2000, 1, 1, 0, 0));
    let alice_left = storage.query_events(alice, range.0, range.1).await.unwrap();
    let bob_left = storage.query_events(bob, range.0, range.1).await.unwrap();
    assert_eq!(ids(&alice_left), vec![alice_boundary.event_id()]);
    assert_eq!(ids(&bob_left), vec![bob_recent.event_id()]);

    assert_eq!(
        storage
            .find_event(alice, alice_old.event_id())
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
}

/// Run all EventStorage contract tests against `$storage`.
#[macro_export]
macro_rules! run_event_storage_tests {
    ($storage:expr) => {
        use $crate::storage::event_storage_tests::*;

        // add / find
        test_add_and_find_round_trip($storage).await;
        println!("  test_add_and_find_round_trip: PASSED");

        test_sub_microsecond_round_trip($storage).await;
        println!("  test_sub_microsecond_round_trip: PASSED");

        test_add_overlapping_is_busy($storage).await;
        println!("  test_add_overlapping_is_busy: PASSED");

        test_owners_are_isolated($storage).await;
        println!("  test_owners_are_isolated: PASSED");

        test_touching_boundaries_allowed($storage).await;
        println!("  test_touching_boundaries_allowed: PASSED");

        test_add_duplicate_id_already_exists($storage).await;
        println!("  test_add_duplicate_id_already_exists: PASSED");

        test_find_missing_not_found($storage).await;
        println!("  test_find_missing_not_found: PASSED");

        // update / delete
        test_update_replaces_event($storage).await;
        println!("  test_update_replaces_event: PASSED");

        test_update_conflict_keeps_original($storage).await;
        println!("  test_update_conflict_keeps_original: PASSED");

        test_update_missing_not_found($storage).await;
        println!("  test_update_missing_not_found: PASSED");

        test_delete_frees_interval($storage).await;
        println!("  test_delete_frees_interval: PASSED");

        // query_events
        test_query_overlapping_ordered($storage).await;
        println!("  test_query_overlapping_ordered: PASSED");

        test_query_unknown_owner_empty($storage).await;
        println!("  test_query_unknown_owner_empty: PASSED");

        // query_events_to_notify
        test_notify_window($storage).await;
        println!("  test_notify_window: PASSED");

        // purge_old_events
        test_purge_across_owners($storage).await;
        println!("  test_purge_across_owners: PASSED");
    };
}
