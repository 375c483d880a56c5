//! Message bus abstraction: keyed publish and manual-ack subscription.
//!
//! The relay publishes `(destination, partition_key, payload)` triples and
//! blocks on broker acknowledgment; the broker preserves ordering per
//! partition key, so all events of one aggregate are observed in append
//! order. Inbound, a [`BusSubscription`] hands events to a consumer one at a
//! time and only advances its committed position on an explicit [`ack`] —
//! an unacked delivery is redelivered, which is what makes at-least-once
//! semantics (and the idempotent consumer guarding against them) work.
//!
//! [`ack`]: BusSubscription::ack
//!
//! # Implementations
//!
//! - `KafkaBus` (in `conveyor-kafka`): production, Kafka-compatible brokers
//! - `InMemoryBus` (in `conveyor-testing`): deterministic tests with failure
//!   injection

use crate::event::DomainEvent;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from bus operations.
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// Failed to connect to the bus.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a destination.
    #[error("Publish failed for destination '{destination}': {reason}")]
    PublishFailed {
        /// The destination that failed.
        destination: String,
        /// The reason for failure.
        reason: String,
    },

    /// The broker did not acknowledge within the publish timeout.
    #[error("Publish to '{destination}' timed out after {timeout_ms}ms")]
    PublishTimeout {
        /// The destination that timed out.
        destination: String,
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// Failed to subscribe to destinations.
    #[error("Subscription failed for {destinations:?}: {reason}")]
    SubscriptionFailed {
        /// The destinations that failed to subscribe.
        destinations: Vec<String>,
        /// The reason for failure.
        reason: String,
    },

    /// A delivered payload was not a valid event envelope.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Failed to commit a consumed offset.
    #[error("Acknowledgment failed: {0}")]
    AckFailed(String),

    /// Network or transport error.
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Broker acknowledgment of a successful publish.
///
/// Carries the partition/offset metadata the broker assigned, mainly for
/// logging and diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublishAck {
    /// Partition the message landed on.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
}

/// Trait for message bus implementations.
///
/// # Delivery Semantics
///
/// At-least-once: a publish that times out may still have reached the broker,
/// and an unacked inbound delivery is redelivered. Downstream consumers
/// absorb the resulting duplicates via the processed-event ledger.
///
/// # Dyn Compatibility
///
/// Methods return explicit `Pin<Box<dyn Future>>` so the relay and workers
/// can hold an `Arc<dyn MessageBus>`.
pub trait MessageBus: Send + Sync {
    /// Publish a payload to a destination, keyed for per-aggregate ordering.
    ///
    /// Blocks until the broker acknowledges (or the implementation's own
    /// timeout elapses) and returns the assigned partition/offset.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] or [`BusError::PublishTimeout`]
    /// if the broker does not acknowledge the message.
    fn publish(
        &self,
        destination: &str,
        partition_key: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<PublishAck, BusError>> + Send + '_>>;

    /// Open a manual-ack subscription over the given destinations.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the subscription cannot
    /// be established.
    fn subscribe(
        &self,
        destinations: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn BusSubscription>, BusError>> + Send + '_>>;
}

/// A manual-ack event subscription.
///
/// Deliveries are handed out one at a time; the consumer processes the event
/// (business effect + ledger insert in one transaction) and then calls
/// [`ack`](Self::ack). Acking is what commits the consumed position — a
/// crash between delivery and ack leads to redelivery, never to a lost
/// event.
pub trait BusSubscription: Send {
    /// Receive the next event.
    ///
    /// Returns `None` when the subscription is closed. An `Err` item is a
    /// transport or decode failure for a single delivery; the subscription
    /// itself stays usable.
    fn next(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Option<Result<DomainEvent, BusError>>> + Send + '_>>;

    /// Acknowledge the most recently delivered event.
    ///
    /// Must be called only after the consumer's transaction committed (or
    /// the event was routed to dead letters).
    ///
    /// # Errors
    ///
    /// Returns [`BusError::AckFailed`] if the commit could not be persisted;
    /// the delivery will then be redelivered, which is safe for idempotent
    /// consumers.
    fn ack(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_timeout_display() {
        let error = BusError::PublishTimeout {
            destination: "order-events".to_string(),
            timeout_ms: 10_000,
        };
        let display = format!("{error}");
        assert!(display.contains("order-events"));
        assert!(display.contains("10000ms"));
    }

    #[test]
    fn publish_failed_display() {
        let error = BusError::PublishFailed {
            destination: "order-events".to_string(),
            reason: "broker unreachable".to_string(),
        };
        assert!(format!("{error}").contains("broker unreachable"));
    }
}
