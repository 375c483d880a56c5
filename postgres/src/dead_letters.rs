//! Dead-letter store for terminally failed inbound events.
//!
//! When a business effect fails with a terminal classification, the event
//! is recorded here instead of being retried indefinitely. Entries carry
//! the full envelope plus failure metadata so an operator can investigate,
//! fix, and either reprocess or discard.

use chrono::{DateTime, Utc};
use conveyor_core::event::DomainEvent;
use conveyor_core::ledger::LedgerError;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

/// Status of a dead-lettered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterStatus {
    /// Awaiting investigation or reprocessing.
    Pending,
    /// Successfully reprocessed.
    Resolved,
    /// Permanently discarded (cannot be fixed).
    Discarded,
}

impl DeadLetterStatus {
    /// Database string representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse a status from its database string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a known status.
    pub fn parse(s: &str) -> Result<Self, LedgerError> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(LedgerError::Database(format!(
                "Invalid dead letter status: {s}"
            ))),
        }
    }
}

/// A terminally failed inbound event awaiting manual handling.
#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    /// Store-assigned entry id.
    pub id: i64,

    /// Id of the failed event.
    pub event_id: Uuid,

    /// The event's type tag.
    pub event_type: String,

    /// Aggregate the event belongs to.
    pub aggregate_id: String,

    /// Causal chain the event is part of.
    pub correlation_id: Uuid,

    /// The event's JSON envelope.
    pub payload: serde_json::Value,

    /// Human-readable error message from the terminal failure.
    pub error_message: String,

    /// Full error details (debug output), if captured.
    pub error_details: Option<String>,

    /// When the event was dead-lettered.
    pub first_failed_at: DateTime<Utc>,

    /// Current handling status.
    pub status: DeadLetterStatus,

    /// When the entry was resolved or discarded, if it was.
    pub resolved_at: Option<DateTime<Utc>>,

    /// Who or what resolved the entry.
    pub resolved_by: Option<String>,

    /// Notes recorded at resolution time.
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-backed store for terminally failed inbound events.
pub struct DeadLetterStore {
    pool: PgPool,
}

impl DeadLetterStore {
    /// Create a new dead-letter store over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a terminally failed event, inside the caller's transaction.
    ///
    /// The insert rides the consumer's transaction so the delivery can be
    /// acknowledged knowing the entry is durable. Returns the entry id.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the insert fails.
    pub async fn add_entry(
        tx: &mut Transaction<'_, Postgres>,
        event: &DomainEvent,
        error_message: &str,
        error_details: Option<&str>,
    ) -> Result<i64, LedgerError> {
        let payload = event
            .to_json()
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO dead_letters (
                event_id, event_type, aggregate_id, correlation_id, payload,
                error_message, error_details
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            ",
        )
        .bind(event.event_id)
        .bind(&event.event_type)
        .bind(&event.aggregate_id)
        .bind(event.correlation_id)
        .bind(payload)
        .bind(error_message)
        .bind(error_details)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        tracing::warn!(
            dead_letter_id = id,
            event_id = %event.event_id,
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            error = error_message,
            "Event dead-lettered"
        );

        metrics::counter!("consumer.dead_lettered", "event_type" => event.event_type.clone())
            .increment(1);

        Ok(id)
    }

    /// List pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails.
    pub async fn list_pending(&self, limit: i64) -> Result<Vec<DeadLetterEntry>, LedgerError> {
        let rows = sqlx::query(
            r"
            SELECT id, event_id, event_type, aggregate_id, correlation_id, payload,
                   error_message, error_details, first_failed_at, status,
                   resolved_at, resolved_by, resolution_notes
            FROM dead_letters
            WHERE status = 'pending'
            ORDER BY first_failed_at ASC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    /// Fetch a specific entry by id.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails or the entry is
    /// missing.
    pub async fn get_by_id(&self, id: i64) -> Result<DeadLetterEntry, LedgerError> {
        let row = sqlx::query(
            r"
            SELECT id, event_id, event_type, aggregate_id, correlation_id, payload,
                   error_message, error_details, first_failed_at, status,
                   resolved_at, resolved_by, resolution_notes
            FROM dead_letters
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        Self::row_to_entry(&row)
    }

    /// Mark an entry resolved after successful manual reprocessing.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the update fails.
    pub async fn mark_resolved(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r"
            UPDATE dead_letters
            SET status = 'resolved', resolved_at = now(), resolved_by = $1, resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        tracing::info!(dead_letter_id = id, resolved_by = resolved_by, "Dead letter resolved");

        Ok(())
    }

    /// Mark an entry permanently discarded.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), LedgerError> {
        sqlx::query(
            r"
            UPDATE dead_letters
            SET status = 'discarded', resolved_at = now(), resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        tracing::warn!(dead_letter_id = id, reason = reason, "Dead letter discarded");

        Ok(())
    }

    /// Count pending entries, for monitoring and health checks.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, LedgerError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM dead_letters WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| LedgerError::Database(e.to_string()))?;

        Ok(count)
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<DeadLetterEntry, LedgerError> {
        let status_str: String = row.get("status");
        let status = DeadLetterStatus::parse(&status_str)?;

        Ok(DeadLetterEntry {
            id: row.get("id"),
            event_id: row.get("event_id"),
            event_type: row.get("event_type"),
            aggregate_id: row.get("aggregate_id"),
            correlation_id: row.get("correlation_id"),
            payload: row.get("payload"),
            error_message: row.get("error_message"),
            error_details: row.get("error_details"),
            first_failed_at: row.get("first_failed_at"),
            status,
            resolved_at: row.get("resolved_at"),
            resolved_by: row.get("resolved_by"),
            resolution_notes: row.get("resolution_notes"),
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code uses expect for clear failure messages
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in &[
            DeadLetterStatus::Pending,
            DeadLetterStatus::Resolved,
            DeadLetterStatus::Discarded,
        ] {
            let parsed =
                DeadLetterStatus::parse(status.as_str()).expect("valid status should parse");
            assert_eq!(*status, parsed);
        }
    }

    #[test]
    fn status_invalid() {
        assert!(DeadLetterStatus::parse("processing").is_err());
    }
}
