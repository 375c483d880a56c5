//! `ReadModelProjector`: pushes rendered documents into the read store.
//!
//! Each upsert runs on its own spawned task, so the caller chooses the
//! consistency it needs per call site:
//!
//! - [`ProjectionHandle::wait`] — block until the document is durable.
//!   Use on request paths that read their own writes.
//! - [`ProjectionHandle::detach`] — fire and forget. The task still runs to
//!   completion and failures are logged; the read model catches up
//!   eventually.

use conveyor_core::read_model::{ProjectionError, ReadModelDocument, ReadModelStore, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

/// Projects rendered documents into a read-model store.
///
/// # Example
///
/// ```ignore
/// use conveyor_projections::{PostgresReadModelStore, ReadModelProjector};
/// use conveyor_core::read_model::ReadModelDocument;
///
/// let projector = ReadModelProjector::new(store);
///
/// // Awaited: caller observes the updated read model afterwards
/// let doc = ReadModelDocument::from_state("customer", "customer-1", 4, &state)?;
/// projector.project(doc).wait().await?;
///
/// // Fire-and-forget: request path does not pay the upsert latency
/// let doc = ReadModelDocument::from_state("customer", "customer-2", 9, &state)?;
/// projector.project(doc).detach();
/// ```
pub struct ReadModelProjector<S>
where
    S: ReadModelStore + 'static,
{
    store: Arc<S>,
}

impl<S> ReadModelProjector<S>
where
    S: ReadModelStore + 'static,
{
    /// Create a projector over a read-model store.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// Upsert a document on a spawned task.
    ///
    /// Returns a handle the caller can [`wait`](ProjectionHandle::wait) on
    /// or [`detach`](ProjectionHandle::detach).
    #[must_use]
    pub fn project(&self, doc: ReadModelDocument) -> ProjectionHandle {
        let store = Arc::clone(&self.store);

        let handle = tokio::spawn(async move {
            let start = Instant::now();
            let result = store.upsert(&doc).await;

            match &result {
                Ok(()) => {
                    metrics::histogram!(
                        "projection.upsert_latency_ms",
                        "aggregate_type" => doc.aggregate_type.clone()
                    )
                    .record(start.elapsed().as_secs_f64() * 1000.0);
                    tracing::debug!(
                        aggregate_id = %doc.aggregate_id,
                        aggregate_type = %doc.aggregate_type,
                        version = doc.version,
                        "Read model upserted"
                    );
                }
                Err(e) => {
                    metrics::counter!(
                        "projection.failed",
                        "aggregate_type" => doc.aggregate_type.clone()
                    )
                    .increment(1);
                    tracing::error!(
                        aggregate_id = %doc.aggregate_id,
                        aggregate_type = %doc.aggregate_type,
                        version = doc.version,
                        error = %e,
                        "Read model upsert failed"
                    );
                }
            }

            result
        });

        ProjectionHandle { handle }
    }

    /// Remove the document for a deleted aggregate on a spawned task.
    ///
    /// Mirrors [`project`](Self::project): the caller decides per call site
    /// whether to [`wait`](ProjectionHandle::wait) for the delete or
    /// [`detach`](ProjectionHandle::detach) it.
    #[must_use]
    pub fn tombstone(&self, aggregate_id: &str) -> ProjectionHandle {
        let store = Arc::clone(&self.store);
        let aggregate_id = aggregate_id.to_string();

        let handle = tokio::spawn(async move {
            let result = store.tombstone(&aggregate_id).await;

            match &result {
                Ok(()) => {
                    tracing::debug!(
                        aggregate_id = %aggregate_id,
                        "Read model tombstoned"
                    );
                }
                Err(e) => {
                    metrics::counter!("projection.failed").increment(1);
                    tracing::error!(
                        aggregate_id = %aggregate_id,
                        error = %e,
                        "Read model tombstone failed"
                    );
                }
            }

            result
        });

        ProjectionHandle { handle }
    }
}

/// Handle to an in-flight projection upsert.
pub struct ProjectionHandle {
    handle: JoinHandle<Result<()>>,
}

impl ProjectionHandle {
    /// Wait for the upsert to complete.
    ///
    /// # Errors
    ///
    /// Returns the upsert's own error, or [`ProjectionError::TaskFailed`]
    /// if the task was cancelled or panicked.
    pub async fn wait(self) -> Result<()> {
        self.handle
            .await
            .map_err(|e| ProjectionError::TaskFailed(e.to_string()))?
    }

    /// Let the upsert finish in the background.
    ///
    /// The task keeps running; failures are logged and counted by the task
    /// itself.
    pub fn detach(self) {
        drop(self.handle);
    }
}
