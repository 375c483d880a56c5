//! Idempotent inbound consumption: business effects, the ledger check, and
//! the worker loop.
//!
//! The bus delivers at least once, so every inbound handler runs behind the
//! processed-event ledger: the effect and the ledger insert share one
//! transaction, and a delivery whose event id is already in the ledger is a
//! no-op. Failures are classified by the effect itself — retryable failures
//! keep the delivery unacked and retry in place, terminal failures route the
//! event to dead letters and acknowledge it.

use conveyor_core::bus::BusSubscription;
use conveyor_core::config::ConsumerConfig;
use conveyor_core::effect::{ConsumerError, EffectError, HandleOutcome};
use conveyor_core::event::DomainEvent;
use conveyor_postgres::dead_letters::DeadLetterStore;
use conveyor_postgres::ledger;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;

/// A business effect applied in reaction to an inbound event.
///
/// Implementations mutate their own tables on the transaction they are
/// handed. They must not commit or roll back; the consumer owns the
/// transaction and couples the effect to the ledger insert.
///
/// # Failure Classification
///
/// - [`EffectError::Retryable`] for expected-transient conditions, such as
///   a referenced aggregate not yet visible because of an event-ordering
///   race across services. The delivery is retried.
/// - [`EffectError::Terminal`] for events that can never be applied. The
///   event goes to dead letters.
pub trait BusinessEffect: Send + Sync {
    /// Apply the effect for one event on the consumer's open transaction.
    ///
    /// # Errors
    ///
    /// Returns an [`EffectError`] classifying the failure; the consumer
    /// rolls the transaction back either way.
    fn apply<'t>(
        &'t self,
        event: &'t DomainEvent,
        tx: &'t mut Transaction<'static, Postgres>,
    ) -> Pin<Box<dyn Future<Output = Result<(), EffectError>> + Send + 't>>;
}

/// Maps event types to the effect that handles them.
///
/// Deliveries with no registered handler are skipped and acknowledged; a
/// destination commonly carries more event types than one consumer cares
/// about.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn BusinessEffect>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an effect for an event type, replacing any previous one.
    #[must_use]
    pub fn register(
        mut self,
        event_type: impl Into<String>,
        effect: Arc<dyn BusinessEffect>,
    ) -> Self {
        self.handlers.insert(event_type.into(), effect);
        self
    }

    /// Get the effect registered for an event type.
    #[must_use]
    pub fn get(&self, event_type: &str) -> Option<&Arc<dyn BusinessEffect>> {
        self.handlers.get(event_type)
    }

    /// Number of registered event types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry has no handlers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Runs one effect per delivery with exactly-once effects over at-least-once
/// delivery.
///
/// The sequence per delivery is:
/// 1. Begin a transaction.
/// 2. Check the ledger; a known event id short-circuits to
///    [`HandleOutcome::Duplicate`].
/// 3. Run the effect on the same transaction.
/// 4. Record the event in the ledger and commit.
///
/// The ledger's unique constraint closes the race where two deliveries of
/// the same event pass the check concurrently: one transaction commits, the
/// other fails and rolls its effect back with it.
#[derive(Clone)]
pub struct IdempotentConsumer {
    pool: PgPool,
}

impl IdempotentConsumer {
    /// Create a consumer over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Handle one delivery with the given effect.
    ///
    /// Any `Ok` outcome means the delivery may be acknowledged; an `Err`
    /// means it must stay unacked and be retried.
    ///
    /// # Errors
    ///
    /// - [`ConsumerError::Database`] if a transaction or ledger operation
    ///   fails.
    /// - [`ConsumerError::EffectRetryable`] if the effect classified its
    ///   failure as retryable.
    /// - [`ConsumerError::DeadLettering`] if a terminally failed event could
    ///   not be recorded in dead letters.
    pub async fn handle(
        &self,
        event: &DomainEvent,
        effect: &dyn BusinessEffect,
    ) -> Result<HandleOutcome, ConsumerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ConsumerError::Database(e.to_string()))?;

        if ledger::contains(&mut tx, event.event_id)
            .await
            .map_err(|e| ConsumerError::Database(e.to_string()))?
        {
            tracing::debug!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                "Duplicate delivery, skipping"
            );
            metrics::counter!("consumer.duplicates", "event_type" => event.event_type.clone())
                .increment(1);
            return Ok(HandleOutcome::Duplicate);
        }

        match effect.apply(event, &mut tx).await {
            Ok(()) => {
                ledger::record(&mut tx, event)
                    .await
                    .map_err(|e| ConsumerError::Database(e.to_string()))?;
                tx.commit()
                    .await
                    .map_err(|e| ConsumerError::Database(e.to_string()))?;

                tracing::debug!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    aggregate_id = %event.aggregate_id,
                    "Effect applied"
                );
                metrics::counter!("consumer.applied", "event_type" => event.event_type.clone())
                    .increment(1);
                Ok(HandleOutcome::Applied)
            }
            Err(EffectError::Retryable(reason)) => {
                tx.rollback()
                    .await
                    .map_err(|e| ConsumerError::Database(e.to_string()))?;
                Err(ConsumerError::EffectRetryable(reason))
            }
            Err(EffectError::Terminal(reason)) => {
                tx.rollback()
                    .await
                    .map_err(|e| ConsumerError::Database(e.to_string()))?;
                self.dead_letter(event, &reason).await?;
                Ok(HandleOutcome::DeadLettered)
            }
        }
    }

    /// Record a terminally failed event in dead letters and the ledger, in
    /// one transaction. The ledger insert makes a redelivery of the same
    /// event a duplicate instead of a second dead-letter entry.
    async fn dead_letter(&self, event: &DomainEvent, reason: &str) -> Result<(), ConsumerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ConsumerError::DeadLettering(e.to_string()))?;

        DeadLetterStore::add_entry(&mut tx, event, reason, None)
            .await
            .map_err(|e| ConsumerError::DeadLettering(e.to_string()))?;
        ledger::record(&mut tx, event)
            .await
            .map_err(|e| ConsumerError::DeadLettering(e.to_string()))?;
        tx.commit()
            .await
            .map_err(|e| ConsumerError::DeadLettering(e.to_string()))?;

        Ok(())
    }
}

/// Worker loop driving a bus subscription through the idempotent consumer.
///
/// Acks a delivery only after its outcome is durable: the effect committed,
/// the ledger already knew the event, or the event landed in dead letters.
/// Retryable failures retry in place with a fixed delay; the subscription
/// stays on the same delivery, so per-aggregate order is preserved.
pub struct ConsumerWorker {
    consumer: IdempotentConsumer,
    registry: HandlerRegistry,
    config: ConsumerConfig,
    /// Shutdown signal
    shutdown: watch::Receiver<bool>,
}

impl ConsumerWorker {
    /// Create a worker over a pool and a handler registry.
    ///
    /// Returns the worker and a shutdown sender.
    #[must_use]
    pub fn new(
        pool: PgPool,
        registry: HandlerRegistry,
        config: ConsumerConfig,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = Self {
            consumer: IdempotentConsumer::new(pool),
            registry,
            config,
            shutdown: shutdown_rx,
        };

        (worker, shutdown_tx)
    }

    /// Drive the subscription until it closes or a shutdown signal arrives.
    pub async fn run(&mut self, mut subscription: Box<dyn BusSubscription>) {
        tracing::info!(
            handlers = self.registry.len(),
            retry_delay_ms = self.config.retry_delay.as_millis() as u64,
            "Starting consumer worker"
        );

        loop {
            tokio::select! {
                delivery = subscription.next() => {
                    let Some(delivery) = delivery else {
                        tracing::info!("Subscription closed");
                        break;
                    };

                    match delivery {
                        Ok(event) => {
                            self.handle_delivery(subscription.as_mut(), &event).await;
                        }
                        Err(e) => {
                            // Single-delivery transport or decode failure;
                            // ack it so the subscription can move on
                            tracing::warn!(error = %e, "Undeliverable message, skipping");
                            Self::ack(subscription.as_mut()).await;
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

        tracing::info!("Consumer worker stopped");
    }

    /// Handle one event to a durable outcome, then ack.
    async fn handle_delivery(&self, subscription: &mut dyn BusSubscription, event: &DomainEvent) {
        let Some(effect) = self.registry.get(&event.event_type) else {
            tracing::debug!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                "No handler registered, skipping"
            );
            Self::ack(subscription).await;
            return;
        };

        loop {
            match self.consumer.handle(event, effect.as_ref()).await {
                Ok(outcome) => {
                    if outcome == HandleOutcome::DeadLettered {
                        tracing::warn!(
                            event_id = %event.event_id,
                            event_type = %event.event_type,
                            "Event dead-lettered, acknowledging delivery"
                        );
                    }
                    Self::ack(subscription).await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        event_id = %event.event_id,
                        event_type = %event.event_type,
                        error = %e,
                        "Delivery failed, retrying in place"
                    );
                    metrics::counter!(
                        "consumer.retries",
                        "event_type" => event.event_type.clone()
                    )
                    .increment(1);

                    tokio::time::sleep(self.config.retry_delay).await;

                    if *self.shutdown.borrow() {
                        // Unacked delivery will be redelivered after restart
                        return;
                    }
                }
            }
        }
    }

    async fn ack(subscription: &mut dyn BusSubscription) {
        if let Err(e) = subscription.ack().await {
            // Redelivery is safe; the ledger absorbs the duplicate
            tracing::warn!(error = %e, "Failed to acknowledge delivery");
        }
    }
}
