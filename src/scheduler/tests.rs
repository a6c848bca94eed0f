use super::*;
use crate::model::{Event, EventId, OwnerId, Title};
use crate::notify::MockNotifier;
use crate::storage::MockEventStorage;
use chrono::Duration as ChronoDuration;
use tokio::time::timeout;

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        notify_interval: Duration::from_millis(50),
        purge_interval: Duration::from_millis(50),
        purge_older_than: Duration::from_secs(60 * 60),
    }
}

fn make_event(start: DateTime<Utc>, end: DateTime<Utc>) -> Event {
    Event::new(
        EventId::new(),
        OwnerId::new(),
        Title::new("sync").unwrap(),
        start,
        end,
    )
    .unwrap()
}

fn make_scheduler() -> (Arc<MockEventStorage>, Arc<MockNotifier>, Scheduler) {
    let storage = Arc::new(MockEventStorage::new());
    let notifier = Arc::new(MockNotifier::new());
    let scheduler = Scheduler::new(storage.clone(), notifier.clone(), fast_config());
    (storage, notifier, scheduler)
}

async fn stop(scheduler: &Scheduler, token: &CancellationToken) {
    token.cancel();
    timeout(Duration::from_secs(5), scheduler.wait())
        .await
        .expect("scheduler did not stop");
}

#[test]
fn test_watermark_pins_first_window_to_now() {
    let now = Utc::now();
    let period = TimeDelta::minutes(1);
    let mut watermark = NotifyWatermark::new();

    let (from, to) = watermark.next_window(now, period);
    assert_eq!(from, now);
    assert_eq!(to, now + period);
    assert_eq!(watermark.from(), Some(now));
}

#[test]
fn test_watermark_windows_are_contiguous() {
    let start = Utc::now();
    let period = TimeDelta::minutes(1);
    let mut watermark = NotifyWatermark::new();

    let (_, first_to) = watermark.next_window(start, period);
    watermark.advance(first_to);

    let (second_from, second_to) = watermark.next_window(start + TimeDelta::seconds(61), period);
    assert_eq!(second_from, first_to);
    assert_eq!(second_to, start + TimeDelta::seconds(121));
}

#[test]
fn test_watermark_never_moves_backwards() {
    let now = Utc::now();
    let mut watermark = NotifyWatermark::new();
    watermark.advance(now);
    watermark.advance(now - TimeDelta::hours(1));
    assert_eq!(watermark.from(), Some(now));
}

#[test]
fn test_default_config() {
    let config = SchedulerConfig::default();
    assert_eq!(config.notify_interval, Duration::from_secs(60));
    assert_eq!(config.purge_interval, Duration::from_secs(3600));
    assert_eq!(config.purge_older_than, Duration::from_secs(365 * 86400));
}

#[tokio::test]
async fn test_notifies_due_event_once() {
    let (storage, notifier, scheduler) = make_scheduler();

    // Notify time lands shortly after the first window opens.
    let start = Utc::now() + ChronoDuration::days(1) + ChronoDuration::milliseconds(80);
    let event = make_event(start, start + ChronoDuration::hours(1)).with_notify_before(1);
    storage.add_event(event.clone()).await.unwrap();

    let token = CancellationToken::new();
    scheduler.schedule(&token);
    tokio::time::sleep(Duration::from_millis(200)).await;
    stop(&scheduler, &token).await;

    // Contiguous windows never yield the same event twice.
    assert_eq!(notifier.take_notified().await, vec![event]);
}

#[tokio::test]
async fn test_successive_windows_are_contiguous() {
    let (storage, _notifier, scheduler) = make_scheduler();

    let token = CancellationToken::new();
    scheduler.schedule(&token);
    tokio::time::sleep(Duration::from_millis(220)).await;
    stop(&scheduler, &token).await;

    let queries = storage.notify_queries().await;
    assert!(queries.len() >= 2, "expected several ticks, got {}", queries.len());
    for pair in queries.windows(2) {
        assert_eq!(pair[0].1, pair[1].0);
    }
}

#[tokio::test]
async fn test_failed_query_keeps_watermark() {
    let (storage, _notifier, scheduler) = make_scheduler();
    storage.set_fail_on_notify_query(true).await;

    let token = CancellationToken::new();
    scheduler.schedule(&token);
    tokio::time::sleep(Duration::from_millis(170)).await;
    stop(&scheduler, &token).await;

    let queries = storage.notify_queries().await;
    assert!(queries.len() >= 2);
    let first_from = queries[0].0;
    assert!(queries.iter().all(|(from, _)| *from == first_from));
}

#[tokio::test]
async fn test_notify_failure_does_not_stop_activity() {
    let (storage, notifier, scheduler) = make_scheduler();
    notifier.set_fail_on_notify(true).await;

    let start = Utc::now() + ChronoDuration::days(1) + ChronoDuration::milliseconds(10);
    storage
        .add_event(make_event(start, start + ChronoDuration::hours(1)).with_notify_before(1))
        .await
        .unwrap();

    let token = CancellationToken::new();
    scheduler.schedule(&token);
    tokio::time::sleep(Duration::from_millis(170)).await;
    stop(&scheduler, &token).await;

    assert_eq!(notifier.notified_count().await, 0);
    let queries = storage.notify_queries().await;
    assert!(queries.len() >= 2);
    // The window holding the failed event was still consumed.
    assert_eq!(queries[0].1, queries[1].0);
}

#[tokio::test]
async fn test_purges_with_retention_cutoff() {
    let (storage, _notifier, scheduler) = make_scheduler();

    let now = Utc::now();
    let old = make_event(now - ChronoDuration::hours(3), now - ChronoDuration::hours(2));
    let recent = make_event(now - ChronoDuration::minutes(30), now - ChronoDuration::minutes(10));
    storage.add_event(old.clone()).await.unwrap();
    storage.add_event(recent.clone()).await.unwrap();

    let token = CancellationToken::new();
    scheduler.schedule(&token);
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop(&scheduler, &token).await;

    assert!(storage.find_event(old.owner_id(), old.event_id()).await.is_err());
    assert!(storage
        .find_event(recent.owner_id(), recent.event_id())
        .await
        .is_ok());

    let purges = storage.purges().await;
    assert!(!purges.is_empty());
    let expected = now - ChronoDuration::hours(1);
    assert!((purges[0] - expected).abs() < ChronoDuration::seconds(5));
}

#[tokio::test]
async fn test_purge_failure_is_retried_next_tick() {
    let (storage, _notifier, scheduler) = make_scheduler();
    storage.set_fail_on_purge(true).await;

    let token = CancellationToken::new();
    scheduler.schedule(&token);
    tokio::time::sleep(Duration::from_millis(170)).await;
    stop(&scheduler, &token).await;

    assert!(storage.purges().await.len() >= 2);
}

#[tokio::test]
async fn test_schedule_is_idempotent_while_running() {
    let (storage, _notifier, scheduler) = make_scheduler();

    let token = CancellationToken::new();
    scheduler.schedule(&token);
    scheduler.schedule(&token);
    // Only one notify activity: all windows chain into a single sequence.
    tokio::time::sleep(Duration::from_millis(170)).await;
    stop(&scheduler, &token).await;

    let queries = storage.notify_queries().await;
    for pair in queries.windows(2) {
        assert_eq!(pair[0].1, pair[1].0);
    }
}

#[tokio::test]
async fn test_can_reschedule_after_cancel() {
    let (storage, _notifier, scheduler) = make_scheduler();

    let first = CancellationToken::new();
    scheduler.schedule(&first);
    stop(&scheduler, &first).await;
    let after_first = storage.notify_queries().await.len();

    let second = CancellationToken::new();
    scheduler.schedule(&second);
    tokio::time::sleep(Duration::from_millis(60)).await;
    stop(&scheduler, &second).await;

    assert!(storage.notify_queries().await.len() > after_first);
}

#[tokio::test]
async fn test_wait_without_schedule_returns() {
    let (_storage, _notifier, scheduler) = make_scheduler();
    timeout(Duration::from_secs(1), scheduler.wait())
        .await
        .unwrap();
}
