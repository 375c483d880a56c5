//! Business-effect error classification and consumer outcomes.
//!
//! The pipeline never retries business failures blindly: the application
//! layer classifies each failure as retryable (e.g. a referenced aggregate
//! not yet visible because of an event-ordering race across services) or
//! terminal (the event can never be applied and must go to manual handling).

use thiserror::Error;

/// A classified failure from applying a business effect.
#[derive(Error, Debug)]
pub enum EffectError {
    /// Expected-transient failure; the delivery should be retried.
    #[error("Retryable effect failure: {0}")]
    Retryable(String),

    /// Permanent failure; the event is routed to dead letters instead of
    /// being retried indefinitely.
    #[error("Terminal effect failure: {0}")]
    Terminal(String),
}

impl EffectError {
    /// Shorthand for a retryable failure.
    #[must_use]
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::Retryable(reason.into())
    }

    /// Shorthand for a terminal failure.
    #[must_use]
    pub fn terminal(reason: impl Into<String>) -> Self {
        Self::Terminal(reason.into())
    }
}

/// Errors surfaced by the idempotent consumer.
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// Database connection or query error; the delivery stays unacked and
    /// will be retried.
    #[error("Database error: {0}")]
    Database(String),

    /// The business effect failed with a retryable classification; the
    /// transaction was rolled back and the delivery stays unacked.
    #[error("Effect failed, will retry: {0}")]
    EffectRetryable(String),

    /// Dead-lettering a terminally failed event itself failed; the delivery
    /// stays unacked so nothing is lost.
    #[error("Dead-lettering failed: {0}")]
    DeadLettering(String),
}

/// What the idempotent consumer did with a delivery.
///
/// All three outcomes mean the delivery can be acknowledged to the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleOutcome {
    /// First delivery: the effect ran and the ledger entry committed.
    Applied,

    /// The ledger already contained this event id; nothing ran.
    Duplicate,

    /// The effect failed terminally; the event was recorded in dead letters.
    DeadLettered,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_shorthand() {
        let error = EffectError::retryable("stock row missing");
        assert!(matches!(error, EffectError::Retryable(_)));
        assert!(format!("{error}").contains("stock row missing"));
    }

    #[test]
    fn terminal_shorthand() {
        let error = EffectError::terminal("unknown currency");
        assert!(matches!(error, EffectError::Terminal(_)));
    }
}
