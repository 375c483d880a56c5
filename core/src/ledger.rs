//! Types and errors for the processed-event ledger.
//!
//! The ledger is a durable set of inbound event ids already acted upon. An
//! inbound consumer checks it and inserts into it in the same transaction as
//! the business effect it guards, so there is no gap between "effect
//! applied" and "marked processed". The storage implementation lives in
//! `conveyor-postgres::ledger`.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Errors from ledger operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(String),
}

/// A record that an inbound event has been processed.
///
/// Never updated once written; duplicate deliveries of the same `event_id`
/// are absorbed by checking for its presence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessedEvent {
    /// Id of the processed inbound event.
    pub event_id: Uuid,

    /// The event's type tag, for diagnostics.
    pub event_type: String,

    /// When the first successful processing committed.
    pub processed_at: DateTime<Utc>,
}
