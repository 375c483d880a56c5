//! Relay drain tests against the in-memory outbox store and bus.
//!
//! Fast and deterministic: each test drives `tick` directly (or runs the
//! loop briefly) and inspects the recorded publishes and outbox rows.

#![allow(clippy::expect_used)] // Test code uses expect for clear failure messages

use conveyor_core::config::RelayConfig;
use conveyor_core::outbox::OutboxStore;
use conveyor_relay::{OutboxRelay, TickStats};
use conveyor_testing::{test_event, InMemoryBus, InMemoryOutboxStore, TimingOutBus};
use std::sync::Arc;
use std::time::Duration;

fn relay_over(
    store: &InMemoryOutboxStore,
    bus: &InMemoryBus,
    config: RelayConfig,
) -> OutboxRelay {
    let (relay, _shutdown) = OutboxRelay::new(
        Arc::new(store.clone()),
        Arc::new(bus.clone()),
        config,
    );
    relay
}

#[tokio::test]
async fn tick_publishes_and_marks_messages() {
    let store = InMemoryOutboxStore::new();
    let bus = InMemoryBus::new();
    let event = test_event("order-1", "OrderPlaced");
    let id = store.insert(&event, "orders.events");

    let relay = relay_over(&store, &bus, RelayConfig::default());
    let stats = relay.tick().await.expect("tick should succeed");

    assert_eq!(
        stats,
        TickStats {
            fetched: 1,
            published: 1,
            failed: 0,
            parked: 0
        }
    );

    let published = bus.published_events("orders.events");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].event_id, event.event_id);
    assert_eq!(bus.published("orders.events")[0].partition_key, "order-1");

    let message = store.get(id).expect("message should exist");
    assert!(message.published_at.is_some());
    assert!(message.last_error.is_none());

    // Published messages are not drained again
    let stats = relay.tick().await.expect("tick should succeed");
    assert_eq!(stats.fetched, 0);
    assert_eq!(bus.published("orders.events").len(), 1);
}

#[tokio::test]
async fn failed_publish_is_retried_until_recovery() {
    let store = InMemoryOutboxStore::new();
    let bus = InMemoryBus::new();
    let event = test_event("order-2", "OrderPlaced");
    let id = store.insert(&event, "orders.events");

    bus.fail_next_publishes(3);
    let relay = relay_over(&store, &bus, RelayConfig::default());

    for attempt in 1..=3 {
        let stats = relay.tick().await.expect("tick should succeed");
        assert_eq!(stats.failed, 1, "attempt {attempt}");
        assert_eq!(stats.parked, 0);

        let message = store.get(id).expect("message should exist");
        assert_eq!(message.retry_count, attempt);
        assert!(message.published_at.is_none());
        assert!(
            message
                .last_error
                .as_deref()
                .expect("failure should be recorded")
                .contains("Injected publish failure")
        );
    }

    // Bus recovered; the next tick publishes and clears the error
    let stats = relay.tick().await.expect("tick should succeed");
    assert_eq!(stats.published, 1);

    let message = store.get(id).expect("message should exist");
    assert!(message.published_at.is_some());
    assert!(message.last_error.is_none());
    assert_eq!(bus.published("orders.events").len(), 1);
}

#[tokio::test]
async fn message_parks_at_retry_ceiling() {
    let store = InMemoryOutboxStore::new();
    let bus = InMemoryBus::new();
    let event = test_event("order-3", "OrderPlaced");
    let id = store.insert(&event, "orders.events");

    bus.fail_next_publishes(u32::MAX);
    let relay = relay_over(&store, &bus, RelayConfig::default());

    for _ in 1..5 {
        let stats = relay.tick().await.expect("tick should succeed");
        assert_eq!(stats.parked, 0);
    }

    // Fifth failure reaches the ceiling
    let stats = relay.tick().await.expect("tick should succeed");
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.parked, 1);

    // Parked messages are excluded from later ticks entirely
    let stats = relay.tick().await.expect("tick should succeed");
    assert_eq!(stats.fetched, 0);

    let message = store.get(id).expect("message should exist");
    assert!(message.is_parked(5));
    assert_eq!(
        store.count_parked(5).await.expect("count should succeed"),
        1
    );
    assert!(bus.published("orders.events").is_empty());
}

#[tokio::test]
async fn messages_of_one_aggregate_publish_in_enqueue_order() {
    let store = InMemoryOutboxStore::new();
    let bus = InMemoryBus::new();

    for event_type in ["OrderPlaced", "OrderPaid", "OrderShipped"] {
        store.insert(&test_event("order-4", event_type), "orders.events");
    }

    let relay = relay_over(&store, &bus, RelayConfig::default());
    let stats = relay.tick().await.expect("tick should succeed");
    assert_eq!(stats.published, 3);

    let records = bus.published("orders.events");
    let types: Vec<String> = records
        .iter()
        .map(|r| r.event().event_type)
        .collect();
    assert_eq!(types, vec!["OrderPlaced", "OrderPaid", "OrderShipped"]);

    // Same partition key throughout, so broker ordering holds end to end
    assert!(records.iter().all(|r| r.partition_key == "order-4"));
    let offsets: Vec<i64> = records.iter().map(|r| r.offset).collect();
    assert_eq!(offsets, vec![0, 1, 2]);
}

#[tokio::test]
async fn one_failure_does_not_block_other_messages() {
    let store = InMemoryOutboxStore::new();
    let bus = InMemoryBus::new();
    let failing = store.insert(&test_event("order-5", "OrderPlaced"), "orders.events");
    let passing = store.insert(&test_event("order-6", "OrderPlaced"), "orders.events");

    // First publish of the tick fails, the second goes through
    bus.fail_next_publishes(1);
    let relay = relay_over(&store, &bus, RelayConfig::default());
    let stats = relay.tick().await.expect("tick should succeed");

    assert_eq!(stats.published, 1);
    assert_eq!(stats.failed, 1);
    assert!(store.get(failing).expect("exists").published_at.is_none());
    assert!(store.get(passing).expect("exists").published_at.is_some());
}

#[tokio::test]
async fn unacknowledged_publish_times_out_and_records_failure() {
    let store = InMemoryOutboxStore::new();
    let event = test_event("order-7", "OrderPlaced");
    let id = store.insert(&event, "orders.events");

    let config = RelayConfig::default().with_publish_timeout(Duration::from_millis(20));
    let (relay, _shutdown) = OutboxRelay::new(
        Arc::new(store.clone()),
        Arc::new(TimingOutBus::new()),
        config,
    );

    let stats = relay.tick().await.expect("tick should succeed");
    assert_eq!(stats.failed, 1);

    let message = store.get(id).expect("message should exist");
    assert_eq!(message.retry_count, 1);
    assert!(
        message
            .last_error
            .as_deref()
            .expect("failure should be recorded")
            .contains("timed out")
    );
}

#[tokio::test]
async fn run_loop_drains_and_stops_on_shutdown() {
    let store = InMemoryOutboxStore::new();
    let bus = InMemoryBus::new();
    store.insert(&test_event("order-8", "OrderPlaced"), "orders.events");

    let config = RelayConfig::default().with_poll_interval(Duration::from_millis(10));
    let (mut relay, shutdown) = OutboxRelay::new(
        Arc::new(store.clone()),
        Arc::new(bus.clone()),
        config,
    );

    let handle = tokio::spawn(async move { relay.run().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    shutdown.send(true).expect("relay should be listening");
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("relay should stop promptly")
        .expect("relay task should not panic");

    assert_eq!(bus.published("orders.events").len(), 1);
}
