//! Transactional outbox: writer and `PostgreSQL` store.
//!
//! [`enqueue`] is the writer half of the outbox pattern: it inserts a row in
//! the same transaction as the aggregate mutation and event log append,
//! which is the entire reason the component exists — either everything
//! commits or nothing does. The writer never talks to the bus.
//!
//! [`PostgresOutboxStore`] is the relay's half: fetching unpublished rows
//! and recording per-message outcomes, each in its own transaction.

use conveyor_core::event::DomainEvent;
use conveyor_core::outbox::{OutboxError, OutboxMessage, OutboxStore};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::future::Future;
use std::pin::Pin;

/// Insert an outbox row for the event inside the caller's transaction.
///
/// Sets `partition_key = event.aggregate_id`, `published_at = NULL`,
/// `retry_count = 0`. The `event_id` column is unique, so re-enqueueing a
/// logically identical event fails rather than double-publishing.
///
/// # Errors
///
/// Returns [`OutboxError::Serialization`] if the envelope cannot be encoded,
/// or [`OutboxError::Database`] if the insert fails (including a duplicate
/// `event_id`). The caller's transaction then rolls back as a whole.
pub async fn enqueue(
    tx: &mut Transaction<'_, Postgres>,
    event: &DomainEvent,
    destination: &str,
) -> Result<(), OutboxError> {
    let payload = event
        .to_json()
        .map_err(|e| OutboxError::Serialization(e.to_string()))?;

    sqlx::query(
        r"
        INSERT INTO outbox_messages
            (aggregate_id, event_type, event_id, destination, partition_key, payload)
        VALUES ($1, $2, $3, $4, $5, $6)
        ",
    )
    .bind(&event.aggregate_id)
    .bind(&event.event_type)
    .bind(event.event_id)
    .bind(destination)
    .bind(event.partition_key())
    .bind(payload)
    .execute(&mut **tx)
    .await
    .map_err(|e| OutboxError::Database(e.to_string()))?;

    tracing::debug!(
        event_id = %event.event_id,
        aggregate_id = %event.aggregate_id,
        destination = destination,
        "Outbox message enqueued"
    );

    Ok(())
}

/// `PostgreSQL`-backed outbox store for the relay.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    /// Create a new outbox store over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_message(row: &sqlx::postgres::PgRow) -> OutboxMessage {
        OutboxMessage {
            id: row.get("id"),
            aggregate_id: row.get("aggregate_id"),
            event_type: row.get("event_type"),
            event_id: row.get("event_id"),
            destination: row.get("destination"),
            partition_key: row.get("partition_key"),
            payload: row.get("payload"),
            created_at: row.get("created_at"),
            published_at: row.get("published_at"),
            retry_count: row.get("retry_count"),
            last_error: row.get("last_error"),
        }
    }
}

const MESSAGE_COLUMNS: &str = "id, aggregate_id, event_type, event_id, destination, \
     partition_key, payload, created_at, published_at, retry_count, last_error";

impl OutboxStore for PostgresOutboxStore {
    fn fetch_unpublished(
        &self,
        below_retry: i32,
        limit: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxMessage>, OutboxError>> + Send + '_>> {
        Box::pin(async move {
            let query = format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM outbox_messages
                 WHERE published_at IS NULL AND retry_count < $1
                 ORDER BY created_at ASC
                 LIMIT $2"
            );

            let rows = sqlx::query(&query)
                .bind(below_retry)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| OutboxError::Database(e.to_string()))?;

            Ok(rows.iter().map(Self::row_to_message).collect())
        })
    }

    fn mark_published(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxError>> + Send + '_>> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE outbox_messages
                SET published_at = now(), last_error = NULL
                WHERE id = $1 AND published_at IS NULL
                ",
            )
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| OutboxError::Database(e.to_string()))?;

            if result.rows_affected() == 0 {
                return Err(OutboxError::NotFound(id));
            }

            Ok(())
        })
    }

    fn record_failure(
        &self,
        id: i64,
        error: &str,
    ) -> Pin<Box<dyn Future<Output = Result<i32, OutboxError>> + Send + '_>> {
        let error = error.to_string();
        Box::pin(async move {
            let row = sqlx::query(
                r"
                UPDATE outbox_messages
                SET retry_count = retry_count + 1, last_error = $2
                WHERE id = $1
                RETURNING retry_count
                ",
            )
            .bind(id)
            .bind(&error)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| OutboxError::Database(e.to_string()))?;

            let row = row.ok_or(OutboxError::NotFound(id))?;
            Ok(row.get::<i32, _>("retry_count"))
        })
    }

    fn count_parked(
        &self,
        ceiling: i32,
    ) -> Pin<Box<dyn Future<Output = Result<i64, OutboxError>> + Send + '_>> {
        Box::pin(async move {
            let (count,): (i64,) = sqlx::query_as(
                r"
                SELECT COUNT(*)
                FROM outbox_messages
                WHERE published_at IS NULL AND retry_count >= $1
                ",
            )
            .bind(ceiling)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| OutboxError::Database(e.to_string()))?;

            Ok(count)
        })
    }

    fn list_parked(
        &self,
        ceiling: i32,
        limit: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxMessage>, OutboxError>> + Send + '_>> {
        Box::pin(async move {
            let query = format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM outbox_messages
                 WHERE published_at IS NULL AND retry_count >= $1
                 ORDER BY created_at ASC
                 LIMIT $2"
            );

            let rows = sqlx::query(&query)
                .bind(ceiling)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| OutboxError::Database(e.to_string()))?;

            Ok(rows.iter().map(Self::row_to_message).collect())
        })
    }
}
