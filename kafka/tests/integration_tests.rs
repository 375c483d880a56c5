//! Integration tests for [`KafkaBus`] against a real Kafka instance.
//!
//! These tests use testcontainers to spin up a real Kafka broker and validate:
//! - Publish round-trip with broker acknowledgment
//! - Per-partition-key ordering
//! - Manual-ack offset commits (unacked deliveries are redelivered)
//! - Decode-failure deliveries
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they:
//! - Require Docker to be running (for testcontainers)
//! - Take 15-60 seconds per test to spin up Kafka
//! - Can be flaky due to Kafka's distributed nature and timing
//!
//! To run explicitly:
//! ```bash
//! cargo test -p conveyor-kafka --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)] // Test code uses expect for clear failure messages

use conveyor_core::bus::{BusError, MessageBus};
use conveyor_core::event::DomainEvent;
use conveyor_kafka::KafkaBus;
use std::time::Duration;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

/// Helper to create test events.
fn order_event(aggregate_id: &str, event_type: &str) -> DomainEvent {
    DomainEvent::builder("Order", aggregate_id, event_type)
        .payload(serde_json::json!({"total_cents": 1299}))
        .build()
}

/// Publish an event's wire encoding keyed by its partition key.
async fn publish_event(
    bus: &KafkaBus,
    destination: &str,
    event: &DomainEvent,
) -> conveyor_core::bus::PublishAck {
    let payload = event.to_wire().expect("Failed to encode event");
    bus.publish(destination, event.partition_key(), &payload)
        .await
        .expect("Failed to publish event")
}

/// Helper to start a Kafka container and wait until publishes succeed.
async fn start_kafka() -> (testcontainers::ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");

    // Wait for the broker to accept publishes with retry logic
    let mut attempts = 0;
    let max_attempts = 60;
    loop {
        if let Ok(bus) = KafkaBus::builder()
            .brokers(&brokers)
            .timeout(Duration::from_secs(2))
            .build()
        {
            let warmup = order_event("warmup", "Warmup");
            let payload = warmup.to_wire().expect("Failed to encode event");
            if bus
                .publish("warmup-topic", "warmup", &payload)
                .await
                .is_ok()
            {
                tokio::time::sleep(Duration::from_millis(500)).await;
                return (kafka, brokers);
            }
        }

        attempts += 1;
        assert!(
            attempts < max_attempts,
            "Kafka failed to become ready after {max_attempts} attempts"
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

#[tokio::test]
#[ignore]
async fn test_publish_round_trip_with_manual_ack() {
    let (_kafka, brokers) = start_kafka().await;

    let bus = KafkaBus::builder()
        .brokers(&brokers)
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create bus");

    // Publish before subscribing; "earliest" replays from the start
    let placed = order_event("order-1", "OrderPlaced");
    let paid = order_event("order-1", "OrderPaid");

    let ack1 = publish_event(&bus, "round-trip-events", &placed).await;
    let ack2 = publish_event(&bus, "round-trip-events", &paid).await;

    // Same partition key lands on the same partition, offsets in order
    assert_eq!(ack1.partition, ack2.partition);
    assert!(ack2.offset > ack1.offset);

    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut subscription = bus
        .subscribe(&["round-trip-events"])
        .await
        .expect("Failed to subscribe");

    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(15), async {
        while received.len() < 2 {
            let event = subscription
                .next()
                .await
                .expect("Subscription ended early")
                .expect("Failed to receive event");
            subscription.ack().await.expect("Failed to ack");
            received.push(event);
        }
    })
    .await
    .expect("Timeout waiting for events");

    assert_eq!(received[0].event_id, placed.event_id);
    assert_eq!(received[0].event_type, "OrderPlaced");
    assert_eq!(received[1].event_id, paid.event_id);
    assert_eq!(received[1].event_type, "OrderPaid");
    assert_eq!(received[0].payload["total_cents"], 1299);
}

#[tokio::test]
#[ignore]
async fn test_unacked_delivery_is_redelivered() {
    let (_kafka, brokers) = start_kafka().await;

    let bus = KafkaBus::builder()
        .brokers(&brokers)
        .consumer_group("redelivery-test")
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create bus");

    let event = order_event("order-2", "OrderPlaced");
    publish_event(&bus, "redelivery-events", &event).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    // First subscription receives the event but never acks
    {
        let mut subscription = bus
            .subscribe(&["redelivery-events"])
            .await
            .expect("Failed to subscribe");
        let received = tokio::time::timeout(Duration::from_secs(15), subscription.next())
            .await
            .expect("Timeout waiting for event")
            .expect("Subscription ended early")
            .expect("Failed to receive event");
        assert_eq!(received.event_id, event.event_id);
        // Dropped without ack: the offset is never committed
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Same group, fresh subscription: the event comes back
    let mut subscription = bus
        .subscribe(&["redelivery-events"])
        .await
        .expect("Failed to subscribe");
    let redelivered = tokio::time::timeout(Duration::from_secs(15), subscription.next())
        .await
        .expect("Timeout waiting for redelivery")
        .expect("Subscription ended early")
        .expect("Failed to receive event");
    assert_eq!(
        redelivered.event_id, event.event_id,
        "Unacked delivery must be redelivered to the group"
    );

    // Ack this time, give the async commit time to land, then verify the
    // group no longer sees the event
    subscription.ack().await.expect("Failed to ack");
    tokio::time::sleep(Duration::from_secs(2)).await;
    drop(subscription);

    let mut subscription = bus
        .subscribe(&["redelivery-events"])
        .await
        .expect("Failed to subscribe");
    let next = tokio::time::timeout(Duration::from_secs(5), subscription.next()).await;
    assert!(
        next.is_err(),
        "Acked delivery must not be redelivered, got: {next:?}"
    );
}

#[tokio::test]
#[ignore]
async fn test_decode_failure_is_delivered_as_error() {
    let (_kafka, brokers) = start_kafka().await;

    let bus = KafkaBus::builder()
        .brokers(&brokers)
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create bus");

    // A payload that is not a DomainEvent envelope
    bus.publish("decode-failure-events", "order-3", b"not an envelope")
        .await
        .expect("Failed to publish raw bytes");
    let event = order_event("order-3", "OrderPlaced");
    publish_event(&bus, "decode-failure-events", &event).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut subscription = bus
        .subscribe(&["decode-failure-events"])
        .await
        .expect("Failed to subscribe");

    let first = tokio::time::timeout(Duration::from_secs(15), subscription.next())
        .await
        .expect("Timeout waiting for delivery")
        .expect("Subscription ended early");
    assert!(
        matches!(first, Err(BusError::DeserializationFailed(_))),
        "Undecodable payload must surface as an error delivery, got: {first:?}"
    );
    subscription.ack().await.expect("Failed to ack");

    // The subscription keeps going; the valid event follows
    let second = tokio::time::timeout(Duration::from_secs(15), subscription.next())
        .await
        .expect("Timeout waiting for event")
        .expect("Subscription ended early")
        .expect("Failed to receive event");
    assert_eq!(second.event_id, event.event_id);
    subscription.ack().await.expect("Failed to ack");
}
