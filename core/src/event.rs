//! Domain event envelope for the propagation pipeline.
//!
//! A [`DomainEvent`] records a business fact at the moment it became true.
//! Events are immutable: once appended to the event log they are never
//! mutated or deleted. The JSON encoding of the whole envelope is the wire
//! format carried by the outbox table and the message bus, so producers and
//! consumers agree on a single codec.
//!
//! # Event Naming Convention
//!
//! `event_type` is a stable string tag and `event_version` a schema version
//! string, allowing schemas to evolve without breaking old consumers:
//!
//! - `"CustomerRegistered"` / `"v1"`
//! - `"OrderShipped"` / `"v2"` (after a schema change)
//!
//! # Example
//!
//! ```
//! use conveyor_core::event::DomainEvent;
//!
//! let event = DomainEvent::builder("customer", "customer-42", "CustomerRegistered")
//!     .payload(serde_json::json!({ "email": "a@example.com" }))
//!     .build();
//!
//! assert_eq!(event.partition_key(), "customer-42");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Error types for event envelope operations.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize an event to its JSON wire form.
    #[error("Failed to serialize event: {0}")]
    Serialization(String),

    /// Failed to deserialize an event from its JSON wire form.
    #[error("Failed to deserialize event: {0}")]
    Deserialization(String),
}

/// An immutable record of a business fact.
///
/// Created by a use case at the moment the fact becomes true, persisted
/// exactly once per logical occurrence, and retained indefinitely for
/// audit purposes.
///
/// # Identity and causality
///
/// - `event_id` is a UUIDv7, so identifiers are unique *and* time-ordered.
/// - `correlation_id` is propagated unchanged across a causal chain of
///   events (e.g., everything triggered by one checkout shares it).
/// - `causation_id` is the id of the event that directly triggered this one,
///   if any.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Unique, time-ordered identifier (UUIDv7).
    pub event_id: Uuid,

    /// Stable string tag, e.g. `"OrderShipped"`.
    pub event_type: String,

    /// Schema version string, e.g. `"v1"`.
    pub event_version: String,

    /// When the business fact became true.
    pub occurred_at: DateTime<Utc>,

    /// Identifier of the aggregate this event belongs to.
    pub aggregate_id: String,

    /// Aggregate type tag, e.g. `"customer"`.
    pub aggregate_type: String,

    /// Shared identifier of the causal chain this event is part of.
    pub correlation_id: Uuid,

    /// Id of the event that triggered this one, if any.
    pub causation_id: Option<Uuid>,

    /// Opaque business payload. The pipeline never inspects it.
    pub payload: serde_json::Value,
}

impl DomainEvent {
    /// Start building an event for the given aggregate.
    ///
    /// Defaults: a fresh UUIDv7 `event_id`, `occurred_at = now`, a fresh
    /// `correlation_id`, no `causation_id`, `event_version = "v1"`, null
    /// payload.
    #[must_use]
    pub fn builder(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
    ) -> DomainEventBuilder {
        DomainEventBuilder {
            event_type: event_type.into(),
            event_version: "v1".to_string(),
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            correlation_id: None,
            causation_id: None,
            payload: serde_json::Value::Null,
        }
    }

    /// The partition key used for ordered delivery.
    ///
    /// Always the aggregate id: all events of one aggregate serialize on one
    /// ordered lane through the bus.
    #[must_use]
    pub fn partition_key(&self) -> &str {
        &self.aggregate_id
    }

    /// Encode the envelope to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if encoding fails.
    pub fn to_wire(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::Serialization(e.to_string()))
    }

    /// Encode the envelope as a JSON value, e.g. for a JSONB column.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<serde_json::Value, EventError> {
        serde_json::to_value(self).map_err(|e| EventError::Serialization(e.to_string()))
    }

    /// Decode an envelope from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialization`] if the bytes are not a valid
    /// envelope.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(|e| EventError::Deserialization(e.to_string()))
    }

    /// Decode an envelope from a JSON value, e.g. a JSONB column.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialization`] if the value is not a valid
    /// envelope.
    pub fn from_json(value: serde_json::Value) -> Result<Self, EventError> {
        serde_json::from_value(value).map_err(|e| EventError::Deserialization(e.to_string()))
    }
}

impl fmt::Display for DomainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} {} on {}",
            self.event_type, self.event_version, self.event_id, self.aggregate_id
        )
    }
}

/// Builder for [`DomainEvent`].
///
/// # Example
///
/// ```
/// use conveyor_core::event::DomainEvent;
///
/// let registered = DomainEvent::builder("customer", "customer-1", "CustomerRegistered")
///     .payload(serde_json::json!({ "email": "a@example.com" }))
///     .build();
///
/// // A follow-up event caused by the first one inherits its correlation id.
/// let welcomed = DomainEvent::builder("customer", "customer-1", "WelcomeMailQueued")
///     .caused_by(&registered)
///     .build();
///
/// assert_eq!(welcomed.correlation_id, registered.correlation_id);
/// assert_eq!(welcomed.causation_id, Some(registered.event_id));
/// ```
#[derive(Debug)]
pub struct DomainEventBuilder {
    event_type: String,
    event_version: String,
    aggregate_id: String,
    aggregate_type: String,
    correlation_id: Option<Uuid>,
    causation_id: Option<Uuid>,
    payload: serde_json::Value,
}

impl DomainEventBuilder {
    /// Set the schema version string (default `"v1"`).
    #[must_use]
    pub fn event_version(mut self, version: impl Into<String>) -> Self {
        self.event_version = version.into();
        self
    }

    /// Set the opaque business payload.
    #[must_use]
    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set an explicit correlation id (e.g. taken from an inbound request).
    #[must_use]
    pub const fn correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Propagate causality from the event that triggered this one.
    ///
    /// Copies the trigger's `correlation_id` and records its `event_id` as
    /// this event's `causation_id`.
    #[must_use]
    pub const fn caused_by(mut self, trigger: &DomainEvent) -> Self {
        self.correlation_id = Some(trigger.correlation_id);
        self.causation_id = Some(trigger.event_id);
        self
    }

    /// Finalize the event, assigning a fresh UUIDv7 id and timestamp.
    #[must_use]
    pub fn build(self) -> DomainEvent {
        DomainEvent {
            event_id: Uuid::now_v7(),
            event_type: self.event_type,
            event_version: self.event_version,
            occurred_at: Utc::now(),
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type,
            correlation_id: self.correlation_id.unwrap_or_else(Uuid::now_v7),
            causation_id: self.causation_id,
            payload: self.payload,
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code uses expect for clear failure messages
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let event = DomainEvent::builder("order", "order-1", "OrderPlaced").build();

        assert_eq!(event.aggregate_type, "order");
        assert_eq!(event.aggregate_id, "order-1");
        assert_eq!(event.event_type, "OrderPlaced");
        assert_eq!(event.event_version, "v1");
        assert_eq!(event.causation_id, None);
        assert_eq!(event.payload, serde_json::Value::Null);
    }

    #[test]
    fn partition_key_is_aggregate_id() {
        let event = DomainEvent::builder("order", "order-7", "OrderPlaced").build();
        assert_eq!(event.partition_key(), "order-7");
    }

    #[test]
    fn event_ids_are_time_ordered() {
        let first = DomainEvent::builder("order", "order-1", "OrderPlaced").build();
        let second = DomainEvent::builder("order", "order-1", "OrderPaid").build();
        assert!(first.event_id < second.event_id);
    }

    #[test]
    fn caused_by_propagates_correlation() {
        let trigger = DomainEvent::builder("order", "order-1", "OrderPlaced").build();
        let effect = DomainEvent::builder("shipment", "shipment-1", "ShipmentRequested")
            .caused_by(&trigger)
            .build();

        assert_eq!(effect.correlation_id, trigger.correlation_id);
        assert_eq!(effect.causation_id, Some(trigger.event_id));
    }

    #[test]
    fn wire_roundtrip() {
        let event = DomainEvent::builder("customer", "customer-1", "CustomerRegistered")
            .event_version("v2")
            .payload(serde_json::json!({ "email": "a@example.com" }))
            .build();

        let bytes = event.to_wire().expect("serialization should succeed");
        let decoded = DomainEvent::from_wire(&bytes).expect("deserialization should succeed");
        assert_eq!(event, decoded);
    }

    #[test]
    fn json_roundtrip() {
        let event = DomainEvent::builder("customer", "customer-1", "CustomerRegistered").build();
        let value = event.to_json().expect("serialization should succeed");
        let decoded = DomainEvent::from_json(value).expect("deserialization should succeed");
        assert_eq!(event, decoded);
    }

    #[test]
    fn from_wire_rejects_garbage() {
        assert!(DomainEvent::from_wire(b"not json").is_err());
    }

    #[test]
    fn display_names_type_and_aggregate() {
        let event = DomainEvent::builder("order", "order-1", "OrderPlaced").build();
        let display = format!("{event}");
        assert!(display.contains("OrderPlaced"));
        assert!(display.contains("order-1"));
    }

    proptest::proptest! {
        // Envelopes survive the wire for arbitrary identifiers and
        // payloads, including unicode and JSON metacharacters
        #[test]
        fn wire_encoding_preserves_any_envelope(
            aggregate_id in ".{1,64}",
            event_type in "[A-Za-z]{1,32}",
            text in ".{0,128}",
        ) {
            let event = DomainEvent::builder("order", aggregate_id, event_type)
                .payload(serde_json::json!({ "note": text }))
                .build();

            let bytes = event.to_wire().expect("serialization should succeed");
            let decoded =
                DomainEvent::from_wire(&bytes).expect("deserialization should succeed");
            proptest::prop_assert_eq!(event, decoded);
        }
    }
}
