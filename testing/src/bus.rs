//! In-memory message bus for fast, deterministic testing.
//!
//! Records every publish per destination, supports injected publish
//! failures for retry paths, and serves manual-ack subscriptions fed by
//! [`InMemoryBus::deliver`]. Delivering the same event twice is how tests
//! exercise at-least-once redelivery.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use conveyor_core::bus::{BusError, BusSubscription, MessageBus, PublishAck};
use conveyor_core::event::DomainEvent;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

/// One recorded publish.
#[derive(Clone, Debug)]
pub struct PublishedRecord {
    /// Partition key the message was published with.
    pub partition_key: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Offset assigned within the destination (insertion order).
    pub offset: i64,
}

impl PublishedRecord {
    /// Decode the payload back into an event envelope.
    #[must_use]
    pub fn event(&self) -> DomainEvent {
        DomainEvent::from_wire(&self.payload).unwrap()
    }
}

#[derive(Default)]
struct BusState {
    published: HashMap<String, Vec<PublishedRecord>>,
    fail_remaining: u32,
    inbound: VecDeque<Result<DomainEvent, BusError>>,
    acked: usize,
}

/// In-memory bus implementing [`MessageBus`].
///
/// # Example
///
/// ```
/// use conveyor_testing::InMemoryBus;
/// use conveyor_core::bus::MessageBus;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
///
/// let ack = bus.publish("orders.events", "order-1", b"{}").await?;
/// assert_eq!(ack.offset, 0);
/// assert_eq!(bus.published("orders.events").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBus {
    state: Arc<RwLock<BusState>>,
}

impl InMemoryBus {
    /// Create a new empty in-memory bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` publishes fail with [`BusError::PublishFailed`].
    pub fn fail_next_publishes(&self, n: u32) {
        self.state.write().unwrap().fail_remaining = n;
    }

    /// All records published to a destination, in publish order.
    #[must_use]
    pub fn published(&self, destination: &str) -> Vec<PublishedRecord> {
        self.state
            .read()
            .unwrap()
            .published
            .get(destination)
            .cloned()
            .unwrap_or_default()
    }

    /// Decoded event envelopes published to a destination, in publish order.
    #[must_use]
    pub fn published_events(&self, destination: &str) -> Vec<DomainEvent> {
        self.published(destination)
            .iter()
            .map(PublishedRecord::event)
            .collect()
    }

    /// Queue an inbound event for delivery to the subscription.
    pub fn deliver(&self, event: DomainEvent) {
        self.state.write().unwrap().inbound.push_back(Ok(event));
    }

    /// Queue an inbound delivery error (transport or decode failure).
    pub fn deliver_error(&self, error: BusError) {
        self.state.write().unwrap().inbound.push_back(Err(error));
    }

    /// Number of acknowledged deliveries.
    #[must_use]
    pub fn ack_count(&self) -> usize {
        self.state.read().unwrap().acked
    }

    /// Clear all recorded state (for test isolation).
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap();
        state.published.clear();
        state.inbound.clear();
        state.fail_remaining = 0;
        state.acked = 0;
    }
}

impl MessageBus for InMemoryBus {
    fn publish(
        &self,
        destination: &str,
        partition_key: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<PublishAck, BusError>> + Send + '_>> {
        let destination = destination.to_string();
        let partition_key = partition_key.to_string();
        let payload = payload.to_vec();

        Box::pin(async move {
            let mut state = self.state.write().unwrap();

            if state.fail_remaining > 0 {
                state.fail_remaining -= 1;
                return Err(BusError::PublishFailed {
                    destination,
                    reason: "Injected publish failure".to_string(),
                });
            }

            let records = state.published.entry(destination).or_default();
            let offset = records.len() as i64;
            records.push(PublishedRecord {
                partition_key,
                payload,
                offset,
            });

            Ok(PublishAck {
                partition: 0,
                offset,
            })
        })
    }

    fn subscribe(
        &self,
        _destinations: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn BusSubscription>, BusError>> + Send + '_>>
    {
        Box::pin(async move {
            Ok(Box::new(InMemorySubscription {
                state: Arc::clone(&self.state),
            }) as Box<dyn BusSubscription>)
        })
    }
}

/// Subscription over the bus's queued inbound deliveries.
///
/// `next` pops deliveries in queue order and returns `None` when the queue
/// is drained, so a worker driving it runs to completion deterministically.
struct InMemorySubscription {
    state: Arc<RwLock<BusState>>,
}

impl BusSubscription for InMemorySubscription {
    fn next(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Option<Result<DomainEvent, BusError>>> + Send + '_>> {
        Box::pin(async move { self.state.write().unwrap().inbound.pop_front() })
    }

    fn ack(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        Box::pin(async move {
            self.state.write().unwrap().acked += 1;
            Ok(())
        })
    }
}

/// A [`MessageBus`] whose publishes always time out.
///
/// For exercising the relay's timeout path without waiting out a real
/// broker timeout.
#[derive(Clone, Default)]
pub struct TimingOutBus {
    _priv: (),
}

impl TimingOutBus {
    /// Create a new timing-out bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageBus for TimingOutBus {
    fn publish(
        &self,
        _destination: &str,
        _partition_key: &str,
        _payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<PublishAck, BusError>> + Send + '_>> {
        // Never resolves; the caller's timeout fires first
        Box::pin(std::future::pending())
    }

    fn subscribe(
        &self,
        destinations: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn BusSubscription>, BusError>> + Send + '_>>
    {
        let destinations: Vec<String> = destinations.iter().map(|s| (*s).to_string()).collect();
        Box::pin(async move {
            Err(BusError::SubscriptionFailed {
                destinations,
                reason: "TimingOutBus does not serve subscriptions".to_string(),
            })
        })
    }
}
