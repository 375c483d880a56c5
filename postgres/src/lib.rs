//! `PostgreSQL` storage for the Conveyor event pipeline.
//!
//! This crate provides the durable write side of the pipeline: the
//! append-only event log, the transactional outbox, the processed-event
//! ledger, and the dead-letter store. All write operations that must be
//! atomic with a business mutation take a [`sqlx::Transaction`] so they
//! commit or roll back together with it.
//!
//! # Example
//!
//! ```ignore
//! use conveyor_core::event::DomainEvent;
//! use conveyor_postgres::{event_log, outbox};
//!
//! async fn place_order(pool: &sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//!     let event = DomainEvent::builder("Order", "order-42", "OrderPlaced")
//!         .payload(serde_json::json!({"total_cents": 1299}))
//!         .build();
//!
//!     let mut tx = pool.begin().await?;
//!     // ... mutate order tables here, in the same transaction ...
//!     event_log::append(&mut tx, &event).await?;
//!     outbox::enqueue(&mut tx, &event, "orders.events").await?;
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dead_letters;
pub mod event_log;
pub mod ledger;
pub mod outbox;

pub use dead_letters::{DeadLetterEntry, DeadLetterStatus, DeadLetterStore};
pub use event_log::PostgresEventLog;
pub use ledger::PostgresProcessedEventLedger;
pub use outbox::PostgresOutboxStore;

use sqlx::PgPool;

/// Run this crate's schema migrations against the given pool.
///
/// # Errors
///
/// Returns a [`sqlx::migrate::MigrateError`] if a migration fails to apply.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
