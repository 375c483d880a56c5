//! `PostgreSQL` processed-event ledger.
//!
//! The check and the insert both run on the caller's open transaction, so
//! "effect applied" and "marked processed" commit as one — there is no
//! window in which a crash could leave the effect applied but unrecorded,
//! or vice versa.

use conveyor_core::event::DomainEvent;
use conveyor_core::ledger::{LedgerError, ProcessedEvent};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Check whether an event id is already in the ledger, inside the caller's
/// transaction.
///
/// # Errors
///
/// Returns [`LedgerError::Database`] if the query fails.
pub async fn contains(
    tx: &mut Transaction<'_, Postgres>,
    event_id: Uuid,
) -> Result<bool, LedgerError> {
    let (exists,): (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM processed_events WHERE event_id = $1)")
            .bind(event_id)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| LedgerError::Database(e.to_string()))?;

    Ok(exists)
}

/// Record an event as processed, inside the caller's transaction.
///
/// # Errors
///
/// Returns [`LedgerError::Database`] if the insert fails. A unique violation
/// here means two deliveries of the same event raced past the `contains`
/// check; the losing transaction fails and rolls back its effect, which is
/// exactly the isolation the ledger exists to provide.
pub async fn record(
    tx: &mut Transaction<'_, Postgres>,
    event: &DomainEvent,
) -> Result<(), LedgerError> {
    sqlx::query("INSERT INTO processed_events (event_id, event_type) VALUES ($1, $2)")
        .bind(event.event_id)
        .bind(&event.event_type)
        .execute(&mut **tx)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

    Ok(())
}

/// Pool-level read access to the ledger, for observability and tests.
#[derive(Clone)]
pub struct PostgresProcessedEventLedger {
    pool: PgPool,
}

impl PostgresProcessedEventLedger {
    /// Create a new ledger reader over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Whether the given event id has been processed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails.
    pub async fn is_processed(&self, event_id: Uuid) -> Result<bool, LedgerError> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM processed_events WHERE event_id = $1)")
                .bind(event_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| LedgerError::Database(e.to_string()))?;

        Ok(exists)
    }

    /// Fetch the ledger record for an event id, if present.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails.
    pub async fn get(&self, event_id: Uuid) -> Result<Option<ProcessedEvent>, LedgerError> {
        let row: Option<(Uuid, String, chrono::DateTime<chrono::Utc>)> = sqlx::query_as(
            "SELECT event_id, event_type, processed_at FROM processed_events WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        Ok(row.map(|(event_id, event_type, processed_at)| ProcessedEvent {
            event_id,
            event_type,
            processed_at,
        }))
    }
}
