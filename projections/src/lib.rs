//! Read-model projection storage and projector for the Conveyor pipeline.
//!
//! Implements the read side of the pipeline: a `PostgreSQL` store for
//! denormalized documents and a projector that pushes rendered documents
//! into it, awaited or fire-and-forget per call site.
//!
//! # Example
//!
//! ```ignore
//! use conveyor_projections::{PostgresReadModelStore, ReadModelProjector};
//! use conveyor_core::read_model::ReadModelDocument;
//!
//! let store = PostgresReadModelStore::new_with_separate_db(
//!     "postgres://localhost/read_models",
//! ).await?;
//! store.migrate().await?;
//!
//! let projector = ReadModelProjector::new(store);
//! let doc = ReadModelDocument::from_state("order", "order-42", 3, &order_view)?;
//! projector.project(doc).wait().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod postgres;
pub mod projector;

pub use postgres::PostgresReadModelStore;
pub use projector::{ProjectionHandle, ReadModelProjector};
