//! In-memory read-model stores for projector tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use conveyor_core::read_model::{ProjectionError, ReadModelDocument, ReadModelStore, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

/// In-memory read-model store implementing [`ReadModelStore`].
///
/// # Example
///
/// ```
/// use conveyor_testing::InMemoryReadModelStore;
/// use conveyor_core::read_model::{ReadModelDocument, ReadModelStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryReadModelStore::new();
/// let doc = ReadModelDocument::from_state("order", "order-1", 1, &serde_json::json!({}))?;
///
/// store.upsert(&doc).await?;
/// assert!(store.exists("order-1").await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryReadModelStore {
    documents: Arc<RwLock<HashMap<String, ReadModelDocument>>>,
    fail_remaining: Arc<AtomicU32>,
}

impl InMemoryReadModelStore {
    /// Create a new empty in-memory read-model store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.read().unwrap().len()
    }

    /// Whether the store holds no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.read().unwrap().is_empty()
    }

    /// Clear all documents (for test isolation).
    pub fn clear(&self) {
        self.documents.write().unwrap().clear();
    }

    /// Fail the next `count` upserts with a storage error, then recover.
    pub fn fail_next_upserts(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }
}

impl ReadModelStore for InMemoryReadModelStore {
    async fn upsert(&self, doc: &ReadModelDocument) -> Result<()> {
        let injected = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(ProjectionError::Storage(
                "Injected storage failure".to_string(),
            ));
        }
        self.documents
            .write()
            .unwrap()
            .insert(doc.aggregate_id.clone(), doc.clone());
        Ok(())
    }

    async fn get(&self, aggregate_id: &str) -> Result<Option<ReadModelDocument>> {
        Ok(self.documents.read().unwrap().get(aggregate_id).cloned())
    }

    async fn tombstone(&self, aggregate_id: &str) -> Result<()> {
        self.documents.write().unwrap().remove(aggregate_id);
        Ok(())
    }

    async fn exists(&self, aggregate_id: &str) -> Result<bool> {
        Ok(self.documents.read().unwrap().contains_key(aggregate_id))
    }
}

/// A [`ReadModelStore`] whose writes always fail.
///
/// For asserting that awaited projections surface storage errors.
#[derive(Clone, Default)]
pub struct FailingReadModelStore {
    _priv: (),
}

impl FailingReadModelStore {
    /// Create a new failing store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReadModelStore for FailingReadModelStore {
    async fn upsert(&self, _doc: &ReadModelDocument) -> Result<()> {
        Err(ProjectionError::Storage(
            "Injected storage failure".to_string(),
        ))
    }

    async fn get(&self, _aggregate_id: &str) -> Result<Option<ReadModelDocument>> {
        Err(ProjectionError::Storage(
            "Injected storage failure".to_string(),
        ))
    }

    async fn tombstone(&self, _aggregate_id: &str) -> Result<()> {
        Err(ProjectionError::Storage(
            "Injected storage failure".to_string(),
        ))
    }

    async fn exists(&self, _aggregate_id: &str) -> Result<bool> {
        Err(ProjectionError::Storage(
            "Injected storage failure".to_string(),
        ))
    }
}
