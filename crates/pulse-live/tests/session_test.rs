//! Live session wiring against the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use pulse_db::test_fixtures::{event_fixture, memory_store, notification_fixture};
use pulse_db::{
    ChangeFeed, Error, Event, EventRepository, Identity, MemoryStore, NotificationRepository,
    Table,
};
use pulse_live::{Backend, LiveSession, LoadTrigger, RetryPolicy, SessionConfig, SessionEvent};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

async fn wait_for<F>(rx: &mut broadcast::Receiver<SessionEvent>, pred: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("session event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

async fn eventually<F: Fn() -> bool>(check: F) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}

fn seqs(events: &[Event]) -> Vec<u64> {
    events
        .iter()
        .map(|e| e.context["seq"].as_u64().unwrap())
        .collect()
}

fn backend(store: &Arc<MemoryStore>) -> Backend {
    Backend::from_store(store.clone(), store.feed())
}

fn quick_config() -> SessionConfig {
    SessionConfig::default()
        .with_resync_interval(Duration::from_secs(3600))
        .with_retry(RetryPolicy::none())
}

async fn insert_event(store: &MemoryStore, seq: u64) -> Event {
    EventRepository::insert(store, event_fixture("page_view", seq))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_window_keeps_newest_twenty_of_twenty_five() {
    let store = memory_store();
    let session = LiveSession::new(backend(&store), quick_config())
        .start(None)
        .await
        .unwrap();
    let mut rx = session.events();

    for seq in 1..=25 {
        insert_event(&store, seq).await;
    }
    let mut updates = 0;
    while updates < 25 {
        if let SessionEvent::WindowUpdated { len } =
            wait_for(&mut rx, |e| matches!(e, SessionEvent::WindowUpdated { .. })).await
        {
            assert!(len <= 20);
            updates += 1;
        }
    }

    let window = session.window_snapshot();
    assert_eq!(window.len(), 20);
    assert_eq!(seqs(&window), (6..=25).rev().collect::<Vec<_>>());
    session.shutdown().await;
}

#[tokio::test]
async fn test_initial_window_loads_from_storage() {
    let store = memory_store();
    for seq in 1..=25 {
        insert_event(&store, seq).await;
    }
    let session = LiveSession::new(backend(&store), quick_config())
        .start(None)
        .await
        .unwrap();

    let window = session.window_snapshot();
    assert_eq!(seqs(&window), (6..=25).rev().collect::<Vec<_>>());
    assert_eq!(session.histogram(30).iter().filter(|b| **b).count(), 20);
    session.shutdown().await;
}

#[tokio::test]
async fn test_burst_beyond_feed_buffer_converges() {
    let store = Arc::new(MemoryStore::new(Arc::new(ChangeFeed::new(4))));
    let session = LiveSession::new(backend(&store), quick_config())
        .start(None)
        .await
        .unwrap();

    for seq in 1..=10 {
        insert_event(&store, seq).await;
    }
    eventually(|| session.window_snapshot().len() == 10).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        seqs(&session.window_snapshot()),
        (1..=10).rev().collect::<Vec<_>>()
    );
    session.shutdown().await;
}

#[tokio::test]
async fn test_push_triggers_full_load() {
    let store = memory_store();
    let owner = Uuid::new_v4();
    let session = LiveSession::new(backend(&store), quick_config())
        .start(Some(Identity::new(owner)))
        .await
        .unwrap();
    let mut rx = session.events();
    assert_eq!(session.unread_count(), 0);
    let fetches = store.notification_fetches();

    NotificationRepository::insert(store.as_ref(), notification_fixture(owner, "Spike"))
        .await
        .unwrap();
    wait_for(&mut rx, |e| {
        matches!(
            e,
            SessionEvent::RegistryLoaded {
                trigger: LoadTrigger::Push,
                ..
            }
        )
    })
    .await;

    assert_eq!(session.unread_count(), 1);
    assert!(store.notification_fetches() > fetches);
    let dashboard = session.dashboard();
    assert_eq!(dashboard.unread_count, 1);
    assert_eq!(dashboard.notifications[0].title, "Spike");
    session.shutdown().await;
}

#[tokio::test]
async fn test_other_viewers_insert_does_not_load() {
    let store = memory_store();
    let owner = Uuid::new_v4();
    let session = LiveSession::new(backend(&store), quick_config())
        .start(Some(Identity::new(owner)))
        .await
        .unwrap();
    let mut rx = session.events();
    let fetches = store.notification_fetches();

    NotificationRepository::insert(
        store.as_ref(),
        notification_fixture(Uuid::new_v4(), "elsewhere"),
    )
    .await
    .unwrap();
    // Give the pump a chance to see the foreign insert before our own.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.notification_fetches(), fetches);

    NotificationRepository::insert(store.as_ref(), notification_fixture(owner, "mine"))
        .await
        .unwrap();
    wait_for(&mut rx, |e| {
        matches!(
            e,
            SessionEvent::RegistryLoaded {
                trigger: LoadTrigger::Push,
                ..
            }
        )
    })
    .await;

    assert_eq!(store.notification_fetches(), fetches + 1);
    let view = session.registry().active_view();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].title, "mine");
    session.shutdown().await;
}

#[tokio::test]
async fn test_queued_pushes_fold_into_one_load() {
    let store = memory_store();
    let owner = Uuid::new_v4();
    let session = LiveSession::new(backend(&store), quick_config())
        .start(Some(Identity::new(owner)))
        .await
        .unwrap();
    let mut rx = session.events();
    let fetches = store.notification_fetches();

    // The pump cannot run between these inserts on the test runtime.
    for i in 0..5 {
        NotificationRepository::insert(store.as_ref(), notification_fixture(owner, &format!("n{}", i)))
            .await
            .unwrap();
    }
    wait_for(&mut rx, |e| {
        matches!(
            e,
            SessionEvent::RegistryLoaded {
                trigger: LoadTrigger::Push,
                ..
            }
        )
    })
    .await;

    assert_eq!(session.unread_count(), 5);
    assert_eq!(store.notification_fetches(), fetches + 1);
    session.shutdown().await;
}

#[tokio::test]
async fn test_failed_load_goes_stale_then_periodic_resync_recovers() {
    let store = memory_store();
    let owner = Uuid::new_v4();
    NotificationRepository::insert(store.as_ref(), notification_fixture(owner, "first"))
        .await
        .unwrap();
    let config = quick_config().with_resync_interval(Duration::from_secs(1));
    let session = LiveSession::new(backend(&store), config)
        .start(Some(Identity::new(owner)))
        .await
        .unwrap();
    let mut rx = session.events();
    assert_eq!(session.registry().active_view().len(), 1);

    store.fail_next_fetches(1);
    NotificationRepository::insert(store.as_ref(), notification_fixture(owner, "second"))
        .await
        .unwrap();
    wait_for(&mut rx, |e| matches!(e, SessionEvent::LoadFailed { .. })).await;

    let snapshot = session.registry().snapshot();
    assert!(snapshot.stale);
    assert!(snapshot.last_error.is_some());
    assert_eq!(snapshot.records.len(), 1);
    assert!(session.dashboard().stale);

    wait_for(&mut rx, |e| {
        matches!(
            e,
            SessionEvent::RegistryLoaded {
                trigger: LoadTrigger::Periodic,
                ..
            }
        )
    })
    .await;
    assert!(!session.registry().is_stale());
    assert_eq!(session.registry().active_view().len(), 2);
    session.shutdown().await;
}

#[tokio::test]
async fn test_periodic_resync_repairs_missed_push() {
    // Writes go to one feed, the session listens on another.
    let store = Arc::new(MemoryStore::new(Arc::new(ChangeFeed::new(16))));
    let silent = Arc::new(ChangeFeed::new(16));
    let owner = Uuid::new_v4();
    let config = quick_config().with_resync_interval(Duration::from_secs(1));
    let session = LiveSession::new(Backend::from_store(store.clone(), silent), config)
        .start(Some(Identity::new(owner)))
        .await
        .unwrap();
    let mut rx = session.events();

    NotificationRepository::insert(store.as_ref(), notification_fixture(owner, "missed"))
        .await
        .unwrap();
    wait_for(&mut rx, |e| {
        matches!(
            e,
            SessionEvent::RegistryLoaded {
                trigger: LoadTrigger::Periodic,
                ..
            }
        )
    })
    .await;

    assert_eq!(session.unread_count(), 1);
    session.shutdown().await;
}

#[tokio::test]
async fn test_transient_load_failure_is_retried() {
    let store = memory_store();
    let owner = Uuid::new_v4();
    NotificationRepository::insert(store.as_ref(), notification_fixture(owner, "x"))
        .await
        .unwrap();
    store.fail_next_fetches(2);

    let retry = RetryPolicy {
        max_attempts: 3,
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    };
    let config = quick_config().with_retry(retry);
    let session = LiveSession::new(backend(&store), config)
        .start(Some(Identity::new(owner)))
        .await
        .unwrap();

    // Both failures land on the retried window load.
    assert!(!session.registry().is_stale());
    assert_eq!(session.unread_count(), 1);
    session.shutdown().await;
}

#[tokio::test]
async fn test_mutations_through_session() {
    let store = memory_store();
    let owner = Uuid::new_v4();
    let n = NotificationRepository::insert(store.as_ref(), notification_fixture(owner, "x"))
        .await
        .unwrap();
    let session = LiveSession::new(backend(&store), quick_config())
        .start(Some(Identity::new(owner)))
        .await
        .unwrap();

    session.mark_read(n.id).await.unwrap();
    assert_eq!(session.unread_count(), 0);
    session.dismiss(n.id).await.unwrap();
    assert!(session.dashboard().notifications.is_empty());
    assert!(matches!(
        session.dismiss(Uuid::new_v4()).await,
        Err(Error::NotFound(_))
    ));
    session.shutdown().await;
}

#[tokio::test]
async fn test_anonymous_session_runs_window_only() {
    let store = memory_store();
    let feed = store.feed();
    let session = LiveSession::new(backend(&store), quick_config())
        .start(None)
        .await
        .unwrap();

    assert_eq!(feed.open_subscriptions(Table::AnalyticsEvents), 1);
    assert_eq!(feed.open_subscriptions(Table::Notifications), 0);
    assert!(matches!(
        session.mark_all_read().await,
        Err(Error::Unauthenticated)
    ));
    assert!(matches!(session.resync().await, Err(Error::Unauthenticated)));
    session.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_releases_subscriptions() {
    let store = memory_store();
    let feed = store.feed();
    let session = LiveSession::new(backend(&store), quick_config())
        .start(Some(Identity::new(Uuid::new_v4())))
        .await
        .unwrap();
    let mut rx = session.events();

    assert_eq!(feed.open_subscriptions(Table::AnalyticsEvents), 1);
    assert_eq!(feed.open_subscriptions(Table::Notifications), 1);
    assert!(session.is_running());

    session.shutdown().await;
    assert_eq!(feed.total_open(), 0);
    assert!(!session.is_running());
    wait_for(&mut rx, |e| matches!(e, SessionEvent::Stopped)).await;

    // Second call is a no-op.
    session.shutdown().await;
    assert_eq!(feed.total_open(), 0);
}

#[tokio::test]
async fn test_drop_releases_subscriptions() {
    let store = memory_store();
    let feed = store.feed();
    let session = LiveSession::new(backend(&store), quick_config())
        .start(Some(Identity::new(Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(feed.total_open(), 2);

    drop(session);
    eventually(|| feed.total_open() == 0).await;
}

#[tokio::test]
async fn test_two_sessions_have_independent_subscriptions() {
    let store = memory_store();
    let feed = store.feed();
    let a = LiveSession::new(backend(&store), quick_config())
        .start(None)
        .await
        .unwrap();
    let b = LiveSession::new(backend(&store), quick_config())
        .start(None)
        .await
        .unwrap();
    assert_eq!(feed.open_subscriptions(Table::AnalyticsEvents), 2);

    a.shutdown().await;
    assert_eq!(feed.open_subscriptions(Table::AnalyticsEvents), 1);

    let mut rx = b.events();
    insert_event(&store, 1).await;
    wait_for(&mut rx, |e| matches!(e, SessionEvent::WindowUpdated { .. })).await;
    assert_eq!(b.window_snapshot().len(), 1);
    assert!(a.window_snapshot().is_empty());
    b.shutdown().await;
}
