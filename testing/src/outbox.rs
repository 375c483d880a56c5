//! In-memory outbox store for relay tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use chrono::Utc;
use conveyor_core::event::DomainEvent;
use conveyor_core::outbox::{OutboxError, OutboxMessage, OutboxStore};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

#[derive(Default)]
struct OutboxState {
    messages: Vec<OutboxMessage>,
    next_id: i64,
}

/// In-memory outbox store implementing [`OutboxStore`].
///
/// Messages are fetched in insertion order, mirroring the `created_at`
/// ordering of the `PostgreSQL` store.
///
/// # Example
///
/// ```
/// use conveyor_testing::{InMemoryOutboxStore, test_event};
/// use conveyor_core::outbox::OutboxStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryOutboxStore::new();
/// let id = store.insert(&test_event("order-1", "OrderPlaced"), "orders.events");
///
/// let pending = store.fetch_unpublished(5, 10).await?;
/// assert_eq!(pending[0].id, id);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    state: Arc<RwLock<OutboxState>>,
}

impl InMemoryOutboxStore {
    /// Create a new empty in-memory outbox store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an unpublished message for the event; returns its id.
    ///
    /// Stands in for the transactional `enqueue` of the `PostgreSQL` store.
    pub fn insert(&self, event: &DomainEvent, destination: &str) -> i64 {
        let mut state = self.state.write().unwrap();
        state.next_id += 1;
        let id = state.next_id;

        state.messages.push(OutboxMessage {
            id,
            aggregate_id: event.aggregate_id.clone(),
            event_type: event.event_type.clone(),
            event_id: event.event_id,
            destination: destination.to_string(),
            partition_key: event.partition_key().to_string(),
            payload: event.to_json().unwrap(),
            created_at: Utc::now(),
            published_at: None,
            retry_count: 0,
            last_error: None,
        });

        id
    }

    /// Get a message by id.
    #[must_use]
    pub fn get(&self, id: i64) -> Option<OutboxMessage> {
        self.state
            .read()
            .unwrap()
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    /// All messages, in insertion order.
    #[must_use]
    pub fn all(&self) -> Vec<OutboxMessage> {
        self.state.read().unwrap().messages.clone()
    }
}

impl OutboxStore for InMemoryOutboxStore {
    fn fetch_unpublished(
        &self,
        below_retry: i32,
        limit: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxMessage>, OutboxError>> + Send + '_>> {
        Box::pin(async move {
            Ok(self
                .state
                .read()
                .unwrap()
                .messages
                .iter()
                .filter(|m| m.published_at.is_none() && m.retry_count < below_retry)
                .take(usize::try_from(limit).unwrap_or(usize::MAX))
                .cloned()
                .collect())
        })
    }

    fn mark_published(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            let message = state
                .messages
                .iter_mut()
                .find(|m| m.id == id && m.published_at.is_none())
                .ok_or(OutboxError::NotFound(id))?;

            message.published_at = Some(Utc::now());
            message.last_error = None;
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
            let mut state = self.state.write().unwrap();
            let message = state
                .messages
                .iter_mut()
                .find(|m| m.id == id)
                .ok_or(OutboxError::NotFound(id))?;

            message.retry_count += 1;
            message.last_error = Some(error);
            Ok(message.retry_count)
        })
    }

    fn count_parked(
        &self,
        ceiling: i32,
    ) -> Pin<Box<dyn Future<Output = Result<i64, OutboxError>> + Send + '_>> {
        Box::pin(async move {
            Ok(self
                .state
                .read()
                .unwrap()
                .messages
                .iter()
                .filter(|m| m.is_parked(ceiling))
                .count() as i64)
        })
    }

    fn list_parked(
        &self,
        ceiling: i32,
        limit: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxMessage>, OutboxError>> + Send + '_>> {
        Box::pin(async move {
            Ok(self
                .state
                .read()
                .unwrap()
                .messages
                .iter()
                .filter(|m| m.is_parked(ceiling))
                .take(usize::try_from(limit).unwrap_or(usize::MAX))
                .cloned()
                .collect())
        })
    }
}
