//! `OutboxRelay`: periodic drain of the outbox to the message bus.
//!
//! The relay is the only component that moves messages out of the outbox
//! table. Every tick it fetches unpublished, unparked messages in enqueue
//! order, publishes each one keyed by its partition key, and records the
//! outcome per message. A failed message keeps its row and is retried on a
//! later tick; after the retry ceiling it is parked and left for manual
//! handling.
//!
//! Run exactly one relay per outbox database. Marking and fetching are not
//! coordinated between instances, so a second drainer would double-publish.
//! Duplicates are absorbed downstream either way, but there is no reason to
//! produce them on purpose.

use conveyor_core::bus::{BusError, MessageBus};
use conveyor_core::config::RelayConfig;
use conveyor_core::outbox::{OutboxError, OutboxMessage, OutboxStore};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Per-tick drain statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Messages fetched from the outbox this tick.
    pub fetched: usize,
    /// Messages published and marked this tick.
    pub published: usize,
    /// Messages whose publish failed this tick.
    pub failed: usize,
    /// Messages that reached the retry ceiling this tick.
    pub parked: usize,
}

/// Periodic outbox drainer.
///
/// # Example
///
/// ```ignore
/// use conveyor_relay::OutboxRelay;
/// use conveyor_core::config::RelayConfig;
///
/// let (mut relay, shutdown) = OutboxRelay::new(store, bus, RelayConfig::default());
///
/// tokio::spawn(async move {
///     tokio::signal::ctrl_c().await.ok();
///     shutdown.send(true).ok();
/// });
///
/// relay.run().await;
/// ```
pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    bus: Arc<dyn MessageBus>,
    config: RelayConfig,
    /// Shutdown signal
    shutdown: watch::Receiver<bool>,
}

impl OutboxRelay {
    /// Create a new relay over an outbox store and a bus.
    ///
    /// Returns the relay and a shutdown sender. Send `true` to the shutdown
    /// sender to gracefully stop the relay; the in-progress tick finishes
    /// first.
    #[must_use]
    pub fn new(
        store: Arc<dyn OutboxStore>,
        bus: Arc<dyn MessageBus>,
        config: RelayConfig,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let relay = Self {
            store,
            bus,
            config,
            shutdown: shutdown_rx,
        };

        (relay, shutdown_tx)
    }

    /// Run the drain loop until a shutdown signal is received.
    ///
    /// A tick that fails wholesale (the fetch or a bookkeeping update hit a
    /// database error) is logged and the loop continues; the messages stay
    /// in the outbox and the next tick picks them up again.
    pub async fn run(&mut self) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            publish_timeout_ms = self.config.publish_timeout.as_millis() as u64,
            max_retry_count = self.config.max_retry_count,
            batch_size = self.config.batch_size,
            "Starting outbox relay"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(stats) if stats.fetched > 0 => {
                            tracing::debug!(
                                fetched = stats.fetched,
                                published = stats.published,
                                failed = stats.failed,
                                parked = stats.parked,
                                "Relay tick complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Relay tick failed");
                        }
                    }
                }

                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                }
            }
        }

        tracing::info!("Outbox relay stopped");
    }

    /// Drain one batch: fetch unpublished messages and publish each in
    /// enqueue order.
    ///
    /// One message's publish failure does not abort the tick; its failure
    /// is recorded and the drain moves on to the next message.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError`] if the fetch or a per-message bookkeeping
    /// update fails. Publish failures are not errors at this level.
    pub async fn tick(&self) -> Result<TickStats, OutboxError> {
        let messages = self
            .store
            .fetch_unpublished(self.config.max_retry_count, self.config.batch_size)
            .await?;

        let mut stats = TickStats {
            fetched: messages.len(),
            ..TickStats::default()
        };

        for message in &messages {
            match self.publish_one(message).await {
                Ok(()) => {
                    self.store.mark_published(message.id).await?;
                    stats.published += 1;
                }
                Err(e) => {
                    let retry_count = self
                        .store
                        .record_failure(message.id, &e.to_string())
                        .await?;
                    stats.failed += 1;

                    metrics::counter!(
                        "outbox_relay.failed",
                        "destination" => message.destination.clone()
                    )
                    .increment(1);

                    if retry_count >= self.config.max_retry_count {
                        stats.parked += 1;
                        tracing::warn!(
                            outbox_id = message.id,
                            event_id = %message.event_id,
                            destination = %message.destination,
                            retry_count = retry_count,
                            error = %e,
                            "Message reached retry ceiling, parked for manual handling"
                        );
                        metrics::counter!(
                            "outbox_relay.parked",
                            "destination" => message.destination.clone()
                        )
                        .increment(1);
                    } else {
                        tracing::warn!(
                            outbox_id = message.id,
                            event_id = %message.event_id,
                            destination = %message.destination,
                            retry_count = retry_count,
                            error = %e,
                            "Publish failed, will retry on a later tick"
                        );
                    }
                }
            }
        }

        Ok(stats)
    }

    /// Publish one message, bounded by the configured publish timeout.
    async fn publish_one(&self, message: &OutboxMessage) -> Result<(), BusError> {
        let payload = serde_json::to_vec(&message.payload).map_err(|e| {
            BusError::PublishFailed {
                destination: message.destination.clone(),
                reason: format!("Failed to encode payload: {e}"),
            }
        })?;

        let start = Instant::now();
        let ack = tokio::time::timeout(
            self.config.publish_timeout,
            self.bus
                .publish(&message.destination, &message.partition_key, &payload),
        )
        .await
        .map_err(|_| BusError::PublishTimeout {
            destination: message.destination.clone(),
            timeout_ms: self.config.publish_timeout.as_millis() as u64,
        })??;

        metrics::histogram!(
            "outbox_relay.publish_latency_ms",
            "destination" => message.destination.clone()
        )
        .record(start.elapsed().as_secs_f64() * 1000.0);
        metrics::counter!(
            "outbox_relay.published",
            "destination" => message.destination.clone()
        )
        .increment(1);

        tracing::debug!(
            outbox_id = message.id,
            event_id = %message.event_id,
            destination = %message.destination,
            partition = ack.partition,
            offset = ack.offset,
            "Outbox message published"
        );

        Ok(())
    }
}
