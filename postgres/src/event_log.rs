//! Append-only `PostgreSQL` event log.
//!
//! Appends run on the caller's open transaction so the log entry commits or
//! rolls back together with the aggregate mutation and the outbox row. The
//! log exposes no update or delete path; entries are retained indefinitely.

use chrono::{DateTime, Utc};
use conveyor_core::event::DomainEvent;
use conveyor_core::event_log::{EventLogEntry, EventLogError};
use sqlx::{PgPool, Postgres, Row, Transaction};

/// Append an event to the log inside the caller's transaction.
///
/// Assigns the next per-aggregate `sequence` (starting at 1) and returns it.
/// The sequence read and the insert share the transaction. Two transactions
/// appending to the same aggregate concurrently can both read the same
/// `MAX(sequence)` under read committed; the loser's insert aborts on the
/// `(aggregate_id, sequence)` primary key and the caller retries the append.
///
/// # Errors
///
/// Returns [`EventLogError::DuplicateEvent`] if this `event_id` was already
/// appended, [`EventLogError::SequenceConflict`] if a concurrent append to
/// the same aggregate won the sequence slot (the event was not persisted;
/// retry), or [`EventLogError::Database`] for any other query failure.
pub async fn append(
    tx: &mut Transaction<'_, Postgres>,
    event: &DomainEvent,
) -> Result<i64, EventLogError> {
    let row = sqlx::query(
        r"
        INSERT INTO event_log (
            aggregate_id, sequence, event_id, event_type, event_version,
            aggregate_type, correlation_id, causation_id, payload, occurred_at
        )
        SELECT $1, COALESCE(MAX(sequence), 0) + 1, $2, $3, $4, $5, $6, $7, $8, $9
        FROM event_log WHERE aggregate_id = $1
        RETURNING sequence
        ",
    )
    .bind(&event.aggregate_id)
    .bind(event.event_id)
    .bind(&event.event_type)
    .bind(&event.event_version)
    .bind(&event.aggregate_type)
    .bind(event.correlation_id)
    .bind(event.causation_id)
    .bind(&event.payload)
    .bind(event.occurred_at)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| classify_append_error(&e, event))?;

    let sequence: i64 = row.get("sequence");

    tracing::debug!(
        event_id = %event.event_id,
        aggregate_id = %event.aggregate_id,
        event_type = %event.event_type,
        sequence = sequence,
        "Event appended"
    );

    Ok(sequence)
}

fn classify_append_error(error: &sqlx::Error, event: &DomainEvent) -> EventLogError {
    if let sqlx::Error::Database(db) = error {
        if db.is_unique_violation() {
            // Two distinct constraints can fire here and they mean different
            // things: the event_id unique index means this occurrence is
            // already persisted, while the (aggregate_id, sequence) primary
            // key means a concurrent append won the sequence slot and this
            // event must be retried.
            return match db.constraint() {
                Some(name) if name.contains("event_id") => {
                    EventLogError::DuplicateEvent(event.event_id)
                },
                _ => EventLogError::SequenceConflict(event.aggregate_id.clone()),
            };
        }
    }
    EventLogError::Database(error.to_string())
}

/// Read side of the event log, used for audits and read-model rebuilds.
#[derive(Clone)]
pub struct PostgresEventLog {
    pool: PgPool,
}

impl PostgresEventLog {
    /// Create a new event log reader over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load an aggregate's full history, ordered by sequence.
    ///
    /// A missing aggregate yields an empty vector; new aggregates start with
    /// no history.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Database`] if the query fails.
    pub async fn load(&self, aggregate_id: &str) -> Result<Vec<EventLogEntry>, EventLogError> {
        self.load_from(aggregate_id, 0).await
    }

    /// Load an aggregate's history after the given sequence (exclusive).
    ///
    /// Used by out-of-band read-model rebuilds that already hold a snapshot
    /// up to some sequence.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Database`] if the query fails.
    pub async fn load_from(
        &self,
        aggregate_id: &str,
        after_sequence: i64,
    ) -> Result<Vec<EventLogEntry>, EventLogError> {
        let rows = sqlx::query(
            r"
            SELECT sequence, event_id, event_type, event_version, aggregate_type,
                   correlation_id, causation_id, payload, occurred_at
            FROM event_log
            WHERE aggregate_id = $1 AND sequence > $2
            ORDER BY sequence ASC
            ",
        )
        .bind(aggregate_id)
        .bind(after_sequence)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EventLogError::Database(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let occurred_at: DateTime<Utc> = row.get("occurred_at");
                Ok(EventLogEntry {
                    sequence: row.get("sequence"),
                    event: DomainEvent {
                        event_id: row.get("event_id"),
                        event_type: row.get("event_type"),
                        event_version: row.get("event_version"),
                        occurred_at,
                        aggregate_id: aggregate_id.to_string(),
                        aggregate_type: row.get("aggregate_type"),
                        correlation_id: row.get("correlation_id"),
                        causation_id: row.get("causation_id"),
                        payload: row.get("payload"),
                    },
                })
            })
            .collect()
    }
}
