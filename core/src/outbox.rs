//! Outbox message type and the store trait drained by the relay.
//!
//! The outbox is a durable table of not-yet-confirmed outbound messages. A
//! row is written in the same transaction as the aggregate mutation and event
//! log append (see `conveyor-postgres::outbox::enqueue`), then drained
//! asynchronously by the relay. Rows are mutable only until published and are
//! never deleted by the pipeline itself.
//!
//! # Implementations
//!
//! - `PostgresOutboxStore` (in `conveyor-postgres`): production
//! - `InMemoryOutboxStore` (in `conveyor-testing`): deterministic tests

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// Errors from outbox store operations.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(String),

    /// A message id was not found in the store.
    #[error("Outbox message not found: {0}")]
    NotFound(i64),

    /// Failed to encode/decode a message payload.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A durable outbound message awaiting (or having received) bus confirmation.
///
/// # Invariants
///
/// - `partition_key == aggregate_id`, so the bus serializes all messages of
///   one aggregate on a single ordered lane.
/// - `published_at` is set at most once, only after bus acknowledgment.
/// - Rows are never deleted by the pipeline; retention is an external job.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboxMessage {
    /// Store-assigned row id.
    pub id: i64,

    /// Aggregate the underlying event belongs to.
    pub aggregate_id: String,

    /// The event's type tag, for diagnostics and filtering.
    pub event_type: String,

    /// Unique id of the underlying domain event.
    pub event_id: Uuid,

    /// Logical topic/channel the message is destined for.
    pub destination: String,

    /// Partition key; equals `aggregate_id`.
    pub partition_key: String,

    /// JSON envelope of the domain event (the wire payload).
    pub payload: serde_json::Value,

    /// When the row was written.
    pub created_at: DateTime<Utc>,

    /// When the bus acknowledged the message; `None` until confirmed.
    pub published_at: Option<DateTime<Utc>>,

    /// Number of failed publish attempts so far.
    pub retry_count: i32,

    /// Short diagnostic from the latest failed attempt.
    pub last_error: Option<String>,
}

impl OutboxMessage {
    /// Whether this message has exhausted its retry budget.
    ///
    /// Parked messages are excluded from relay ticks and surface through
    /// [`OutboxStore::list_parked`] for manual intervention; they are never
    /// silently dropped.
    #[must_use]
    pub const fn is_parked(&self, max_retry_count: i32) -> bool {
        self.published_at.is_none() && self.retry_count >= max_retry_count
    }
}

/// Storage abstraction for the outbox table.
///
/// The writer inserts rows inside the use case's transaction; this trait
/// covers the relay side: fetching unpublished rows and recording the
/// per-message outcome, each in its own transaction so one message's failure
/// cannot roll back another's success.
///
/// # Dyn Compatibility
///
/// Methods return explicit `Pin<Box<dyn Future>>` so the relay can hold an
/// `Arc<dyn OutboxStore>`.
pub trait OutboxStore: Send + Sync {
    /// Fetch unpublished messages still under the retry ceiling, oldest first.
    ///
    /// Rows with `retry_count >= below_retry` are parked and not returned.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the query fails.
    fn fetch_unpublished(
        &self,
        below_retry: i32,
        limit: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxMessage>, OutboxError>> + Send + '_>>;

    /// Record a successful publish: set `published_at`, clear `last_error`.
    ///
    /// Runs in its own transaction, independent from other messages in the
    /// same relay tick.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] on query failure or
    /// [`OutboxError::NotFound`] for an unknown id.
    fn mark_published(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxError>> + Send + '_>>;

    /// Record a failed publish attempt: increment `retry_count`, set
    /// `last_error`. Returns the new retry count so the caller can detect the
    /// crossing into the parked state.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] on query failure or
    /// [`OutboxError::NotFound`] for an unknown id.
    fn record_failure(
        &self,
        id: i64,
        error: &str,
    ) -> Pin<Box<dyn Future<Output = Result<i32, OutboxError>> + Send + '_>>;

    /// Count messages parked at or above the given retry ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the query fails.
    fn count_parked(
        &self,
        ceiling: i32,
    ) -> Pin<Box<dyn Future<Output = Result<i64, OutboxError>> + Send + '_>>;

    /// List parked messages for manual remediation, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the query fails.
    fn list_parked(
        &self,
        ceiling: i32,
        limit: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxMessage>, OutboxError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(retry_count: i32, published: bool) -> OutboxMessage {
        OutboxMessage {
            id: 1,
            aggregate_id: "order-1".to_string(),
            event_type: "OrderPlaced".to_string(),
            event_id: Uuid::now_v7(),
            destination: "order-events".to_string(),
            partition_key: "order-1".to_string(),
            payload: serde_json::json!({}),
            created_at: Utc::now(),
            published_at: published.then(Utc::now),
            retry_count,
            last_error: None,
        }
    }

    #[test]
    fn parked_at_ceiling() {
        assert!(message(5, false).is_parked(5));
        assert!(message(6, false).is_parked(5));
    }

    #[test]
    fn under_ceiling_is_not_parked() {
        assert!(!message(4, false).is_parked(5));
        assert!(!message(0, false).is_parked(5));
    }

    #[test]
    fn published_is_never_parked() {
        assert!(!message(7, true).is_parked(5));
    }
}
