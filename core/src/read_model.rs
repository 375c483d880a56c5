//! Read-model document type and store trait.
//!
//! A read model is a denormalized, query-optimized copy of write-side state,
//! kept eventually consistent by the projector. Documents are keyed by
//! aggregate id with last-writer-wins semantics and are removed only via an
//! explicit tombstone mirroring aggregate deletion.
//!
//! # Ownership
//!
//! Documents are written exclusively by the projector; no other component
//! may touch the read store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Error type for projection operations.
#[derive(Error, Debug)]
pub enum ProjectionError {
    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Failed to serialize aggregate state into a document.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The projection task was cancelled or panicked before completing.
    #[error("Projection task failed: {0}")]
    TaskFailed(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// A denormalized snapshot of one aggregate, ready for the read store.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadModelDocument {
    /// Aggregate this document mirrors; the upsert key.
    pub aggregate_id: String,

    /// Aggregate type tag, e.g. `"customer"`.
    pub aggregate_type: String,

    /// Write-side version the document was rendered from; monotonically
    /// increasing per aggregate under last-writer-wins.
    pub version: i64,

    /// The denormalized fields downstream queries need.
    pub document: serde_json::Value,

    /// When the projector rendered this snapshot.
    pub rendered_at: DateTime<Utc>,
}

impl ReadModelDocument {
    /// Render a document from serializable aggregate state.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Serialization`] if the state cannot be
    /// encoded as JSON.
    pub fn from_state<S: Serialize>(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        version: i64,
        state: &S,
    ) -> Result<Self> {
        let document = serde_json::to_value(state)
            .map_err(|e| ProjectionError::Serialization(e.to_string()))?;

        Ok(Self {
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            version,
            document,
            rendered_at: Utc::now(),
        })
    }
}

/// Storage abstraction for read-model documents.
///
/// # Implementations
///
/// - `PostgresReadModelStore` (in `conveyor-projections`): production
/// - `InMemoryReadModelStore` (in `conveyor-testing`): deterministic tests
pub trait ReadModelStore: Send + Sync {
    /// Upsert a document by aggregate id (last-writer-wins).
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the write fails.
    fn upsert(&self, doc: &ReadModelDocument) -> impl Future<Output = Result<()>> + Send;

    /// Fetch the current document for an aggregate, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails.
    fn get(
        &self,
        aggregate_id: &str,
    ) -> impl Future<Output = Result<Option<ReadModelDocument>>> + Send;

    /// Remove the document for a deleted aggregate.
    ///
    /// The only sanctioned deletion path; absent documents are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the delete fails.
    fn tombstone(&self, aggregate_id: &str) -> impl Future<Output = Result<()>> + Send;

    /// Whether a document exists for the aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails.
    fn exists(&self, aggregate_id: &str) -> impl Future<Output = Result<bool>> + Send;
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code uses expect for clear failure messages
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct CustomerView {
        email: String,
        order_count: u32,
    }

    #[test]
    fn from_state_renders_json() {
        let state = CustomerView {
            email: "a@example.com".to_string(),
            order_count: 3,
        };

        let doc = ReadModelDocument::from_state("customer", "customer-1", 7, &state)
            .expect("serialization should succeed");

        assert_eq!(doc.aggregate_id, "customer-1");
        assert_eq!(doc.version, 7);
        assert_eq!(doc.document["email"], "a@example.com");
        assert_eq!(doc.document["order_count"], 3);
    }
}
