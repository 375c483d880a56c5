//! Kafka message bus implementation for the Conveyor pipeline.
//!
//! This crate provides a production-ready Kafka-based bus that implements the
//! [`MessageBus`] trait from `conveyor-core`. It uses rdkafka and works with
//! any Kafka-compatible broker (Apache Kafka, Redpanda, AWS MSK, ...).
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Outbound, [`publish`] blocks until the broker acknowledges the write and
//!   returns the assigned partition/offset. Messages are keyed by the
//!   caller's partition key, so all events of one aggregate land on the same
//!   partition and keep their order.
//! - Inbound, a subscription hands out one event at a time and only commits
//!   the consumed offset when the consumer calls
//!   [`ack`](conveyor_core::bus::BusSubscription::ack). A crash between
//!   delivery and ack causes redelivery, never loss; consumers absorb the
//!   resulting duplicates via the processed-event ledger.
//!
//! [`publish`]: conveyor_core::bus::MessageBus::publish
//!
//! # Example
//!
//! ```no_run
//! use conveyor_kafka::KafkaBus;
//! use conveyor_core::bus::MessageBus;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = KafkaBus::builder()
//!     .brokers("localhost:9092")
//!     .producer_acks("all")
//!     .consumer_group("order-read-model")
//!     .build()?;
//!
//! let ack = bus.publish("orders.events", "order-42", b"{}").await?;
//! println!("landed on partition {} at offset {}", ack.partition, ack.offset);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use conveyor_core::bus::{BusError, BusSubscription, MessageBus, PublishAck};
use conveyor_core::event::DomainEvent;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Kafka message bus.
///
/// Publishes outbox payloads keyed by partition key and serves manual-ack
/// subscriptions for inbound consumers.
///
/// # Configuration
///
/// - **Broker addresses**: bootstrap servers (required)
/// - **Producer settings**: acks, compression, ack timeout
/// - **Consumer group**: explicit ID or auto-generated from destinations
/// - **Offset reset**: where new groups start reading (default: "latest")
pub struct KafkaBus {
    /// Kafka producer for publishing messages
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// How long a publish waits for broker acknowledgment
    timeout: Duration,
    /// Consumer group ID (if explicitly set)
    consumer_group: Option<String>,
    /// Auto offset reset policy
    auto_offset_reset: String,
}

impl KafkaBus {
    /// Create a new bus with default configuration.
    ///
    /// # Parameters
    ///
    /// - `brokers`: Comma-separated list of broker addresses
    ///   (e.g., "localhost:9092")
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the producer cannot be
    /// created from the given configuration.
    pub fn new(brokers: &str) -> Result<Self, BusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the bus.
    #[must_use]
    pub fn builder() -> KafkaBusBuilder {
        KafkaBusBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for configuring a [`KafkaBus`].
///
/// # Example
///
/// ```no_run
/// use conveyor_kafka::KafkaBus;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = KafkaBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .compression("lz4")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct KafkaBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
}

impl KafkaBusBuilder {
    /// Set the broker addresses.
    ///
    /// # Parameters
    ///
    /// - `brokers`: Comma-separated list of broker addresses
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode.
    ///
    /// # Parameters
    ///
    /// - `acks`: "0" (no acks), "1" (leader ack), "all" (all replicas ack)
    ///
    /// Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec.
    ///
    /// # Parameters
    ///
    /// - `compression`: "none", "gzip", "snappy", "lz4", "zstd"
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set how long a publish waits for broker acknowledgment.
    ///
    /// Default: 10 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID for subscriptions.
    ///
    /// If not set, the consumer group is auto-generated from the sorted
    /// subscribed destinations. Setting an explicit group lets multiple
    /// instances of a service share the workload.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the auto offset reset policy for new consumer groups.
    ///
    /// Controls where new consumer groups start reading when no committed
    /// offset exists:
    /// - `"earliest"`: start from the beginning of the destination
    /// - `"latest"`: start from the end (only new events)
    ///
    /// Default: "latest"
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`KafkaBus`].
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if:
    /// - Brokers not set
    /// - Cannot create producer
    /// - Invalid configuration
    pub fn build(self) -> Result<KafkaBus, BusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BusError::ConnectionFailed("Brokers not configured".to_string()))?;

        let timeout = self.timeout.unwrap_or(Duration::from_secs(10));

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", self.producer_acks.as_deref().unwrap_or("all"))
            .set(
                "compression.type",
                self.compression.as_deref().unwrap_or("none"),
            );

        let producer: FutureProducer = producer_config
            .create()
            .map_err(|e| BusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("all"),
            compression = self.compression.as_deref().unwrap_or("none"),
            timeout_ms = timeout.as_millis() as u64,
            auto_offset_reset = self.auto_offset_reset.as_deref().unwrap_or("latest"),
            "KafkaBus created successfully"
        );

        Ok(KafkaBus {
            producer,
            brokers,
            timeout,
            consumer_group: self.consumer_group,
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "latest".to_string()),
        })
    }
}

impl MessageBus for KafkaBus {
    fn publish(
        &self,
        destination: &str,
        partition_key: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<PublishAck, BusError>> + Send + '_>> {
        // Clone data before moving into async block
        let destination = destination.to_string();
        let partition_key = partition_key.to_string();
        let payload = payload.to_vec();
        let timeout = self.timeout;

        Box::pin(async move {
            // Key by partition key: all events of one aggregate land on the
            // same partition, preserving append order end to end
            let record = FutureRecord::to(&destination)
                .payload(&payload)
                .key(partition_key.as_bytes());

            let send_result = self.producer.send(record, Timeout::After(timeout)).await;

            match send_result {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        destination = %destination,
                        partition = partition,
                        offset = offset,
                        partition_key = %partition_key,
                        "Message published successfully"
                    );
                    Ok(PublishAck { partition, offset })
                },
                Err((
                    KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut),
                    _,
                )) => {
                    tracing::error!(
                        destination = %destination,
                        timeout_ms = timeout.as_millis() as u64,
                        "Publish timed out waiting for broker acknowledgment"
                    );
                    Err(BusError::PublishTimeout {
                        destination,
                        timeout_ms: timeout.as_millis() as u64,
                    })
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        destination = %destination,
                        error = %kafka_error,
                        "Failed to publish message"
                    );
                    Err(BusError::PublishFailed {
                        destination,
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe(
        &self,
        destinations: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn BusSubscription>, BusError>> + Send + '_>>
    {
        // Clone configuration before moving into async block
        let destinations: Vec<String> = destinations.iter().map(|s| (*s).to_string()).collect();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            // If explicitly set, use it; otherwise generate from sorted
            // destinations for deterministic naming
            let consumer_group_id = if let Some(group) = consumer_group {
                group
            } else {
                let mut sorted = destinations.clone();
                sorted.sort();
                format!("conveyor-{}", sorted.join("-"))
            };

            // Manual commit for at-least-once delivery
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| BusError::SubscriptionFailed {
                    destinations: destinations.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let destination_refs: Vec<&str> = destinations.iter().map(String::as_str).collect();
            consumer
                .subscribe(&destination_refs)
                .map_err(|e| BusError::SubscriptionFailed {
                    destinations: destinations.clone(),
                    reason: format!("Failed to subscribe: {e}"),
                })?;

            tracing::info!(
                destinations = ?destinations,
                consumer_group = %consumer_group_id,
                auto_offset_reset = %auto_offset_reset,
                manual_commit = true,
                "Subscribed to destinations"
            );

            let (delivery_tx, delivery_rx) = mpsc::channel(1);
            let (ack_tx, mut ack_rx) =
                mpsc::channel::<oneshot::Sender<Result<(), BusError>>>(1);

            // Spawn a task that owns the consumer. It hands out one
            // delivery at a time and holds the message until the consumer
            // acks, so the committed offset never runs ahead of durable
            // processing.
            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();

                while let Some(msg_result) = stream.next().await {
                    match msg_result {
                        Ok(message) => {
                            let event_result = match message.payload() {
                                Some(payload) => DomainEvent::from_wire(payload).map_err(|e| {
                                    BusError::DeserializationFailed(e.to_string())
                                }),
                                None => Err(BusError::DeserializationFailed(
                                    "Message has no payload".to_string(),
                                )),
                            };

                            if let Ok(event) = &event_result {
                                tracing::trace!(
                                    destination = message.topic(),
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    event_id = %event.event_id,
                                    event_type = %event.event_type,
                                    "Received event"
                                );
                            }

                            if delivery_tx.send(event_result).await.is_err() {
                                tracing::debug!(
                                    "Subscription dropped, exiting consumer task"
                                );
                                break; // Exit WITHOUT committing
                            }

                            // Wait for the ack before committing or
                            // fetching the next message
                            let Some(reply) = ack_rx.recv().await else {
                                break;
                            };

                            let commit = consumer
                                .commit_message(&message, CommitMode::Async)
                                .map_err(|e| {
                                    tracing::warn!(
                                        destination = message.topic(),
                                        partition = message.partition(),
                                        offset = message.offset(),
                                        error = %e,
                                        "Failed to commit offset (message may be redelivered)"
                                    );
                                    BusError::AckFailed(e.to_string())
                                });

                            if reply.send(commit).is_err() {
                                break;
                            }
                        },
                        Err(e) => {
                            let err = BusError::TransportError(format!(
                                "Failed to receive message: {e}"
                            ));
                            if delivery_tx.send(Err(err)).await.is_err() {
                                break;
                            }
                            // Nothing to commit for a transport error, but
                            // the delivery still needs its ack to keep the
                            // one-in-flight protocol in step
                            let Some(reply) = ack_rx.recv().await else {
                                break;
                            };
                            if reply.send(Ok(())).is_err() {
                                break;
                            }
                        },
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            Ok(Box::new(KafkaSubscription {
                deliveries: delivery_rx,
                acks: ack_tx,
            }) as Box<dyn BusSubscription>)
        })
    }
}

/// Manual-ack subscription over a Kafka consumer.
///
/// Deliveries arrive one at a time from the consumer task; calling
/// [`ack`](BusSubscription::ack) commits the offset of the delivery most
/// recently handed out and releases the next one.
struct KafkaSubscription {
    deliveries: mpsc::Receiver<Result<DomainEvent, BusError>>,
    acks: mpsc::Sender<oneshot::Sender<Result<(), BusError>>>,
}

impl BusSubscription for KafkaSubscription {
    fn next(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Option<Result<DomainEvent, BusError>>> + Send + '_>> {
        Box::pin(async move { self.deliveries.recv().await })
    }

    fn ack(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        Box::pin(async move {
            let (reply_tx, reply_rx) = oneshot::channel();
            self.acks
                .send(reply_tx)
                .await
                .map_err(|_| BusError::AckFailed("Subscription closed".to_string()))?;
            reply_rx
                .await
                .map_err(|_| BusError::AckFailed("Subscription closed".to_string()))?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kafka_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<KafkaBus>();
        assert_sync::<KafkaBus>();
    }

    #[test]
    fn builder_requires_brokers() {
        let result = KafkaBus::builder().build();
        assert!(matches!(result, Err(BusError::ConnectionFailed(_))));
    }
}
