//! # Conveyor Testing
//!
//! Testing utilities and in-memory implementations for the Conveyor
//! pipeline.
//!
//! This crate provides:
//! - [`InMemoryBus`]: records publishes, injects failures, serves
//!   manual-ack subscriptions
//! - [`InMemoryOutboxStore`]: outbox semantics without a database
//! - [`InMemoryReadModelStore`] / [`FailingReadModelStore`]: projector
//!   test doubles
//! - [`test_event`]: event envelope builder for tests
//! - [`init_test_tracing`]: one-line tracing setup honoring `RUST_LOG`
//!
//! ## Example
//!
//! ```ignore
//! use conveyor_testing::{test_event, InMemoryBus, InMemoryOutboxStore};
//!
//! #[tokio::test]
//! async fn relay_publishes_enqueued_messages() {
//!     let store = InMemoryOutboxStore::new();
//!     let bus = InMemoryBus::new();
//!     store.insert(&test_event("order-1", "OrderPlaced"), "orders.events");
//!
//!     // drive a relay tick against store and bus, then:
//!     assert_eq!(bus.published("orders.events").len(), 1);
//! }
//! ```

pub mod bus;
pub mod outbox;
pub mod read_model;

pub use bus::{InMemoryBus, PublishedRecord, TimingOutBus};
pub use outbox::InMemoryOutboxStore;
pub use read_model::{FailingReadModelStore, InMemoryReadModelStore};

use conveyor_core::event::DomainEvent;

/// Build an event envelope with a placeholder payload for tests.
///
/// Aggregate type is fixed to `"Order"`; tests that care about the payload
/// or causal chain use [`DomainEvent::builder`] directly.
#[must_use]
pub fn test_event(aggregate_id: &str, event_type: &str) -> DomainEvent {
    DomainEvent::builder("Order", aggregate_id, event_type)
        .payload(serde_json::json!({"test": true}))
        .build()
}

/// Install a tracing subscriber for tests, honoring `RUST_LOG`.
///
/// Safe to call from multiple tests; only the first call installs.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
