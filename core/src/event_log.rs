//! Types and errors for the append-only event log.
//!
//! The event log is the per-aggregate ordered record of everything that
//! happened; appends are co-located in the same transaction as the aggregate
//! mutation and the outbox write. The storage implementation lives in
//! `conveyor-postgres::event_log`; this module carries the shared record
//! type and error enum.

use crate::event::DomainEvent;
use thiserror::Error;

/// Errors from event log operations.
#[derive(Error, Debug)]
pub enum EventLogError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(String),

    /// Failed to encode/decode an event envelope.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An `event_id` was appended twice; each logical occurrence is
    /// persisted exactly once.
    #[error("Duplicate event id: {0}")]
    DuplicateEvent(uuid::Uuid),

    /// Two transactions raced for the same sequence slot of one aggregate.
    /// The event was NOT persisted; retry the whole append.
    #[error("Concurrent append to aggregate {0}, sequence slot taken")]
    SequenceConflict(String),
}

/// A stored event together with its position in the aggregate's stream.
///
/// `sequence` starts at 1 per aggregate and increases by 1 per append, which
/// is what "per-aggregate ordered" means concretely: replaying entries by
/// ascending sequence reproduces the aggregate's history.
#[derive(Clone, Debug, PartialEq)]
pub struct EventLogEntry {
    /// Position within the aggregate's stream, starting at 1.
    pub sequence: i64,

    /// The recorded event.
    pub event: DomainEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn duplicate_event_display() {
        let id = Uuid::now_v7();
        let error = EventLogError::DuplicateEvent(id);
        assert!(format!("{error}").contains(&id.to_string()));
    }
}
