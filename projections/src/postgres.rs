//! `PostgreSQL` read-model store.
//!
//! # Overview
//!
//! Stores one denormalized document per aggregate in the `read_models`
//! table, keyed by aggregate id with last-writer-wins upserts. The read
//! store can share the write-side pool (simple setup) or live on its own
//! database (full CQRS separation).
//!
//! ```text
//! Write Side                        Read Side
//! ┌─────────────────────┐          ┌─────────────────────┐
//! │  PostgreSQL DB #1   │          │  PostgreSQL DB #2   │
//! │                     │          │                     │
//! │  event_log          │          │  read_models        │
//! │  outbox_messages    │   →→→    │                     │
//! │  processed_events   │  Events  │                     │
//! └─────────────────────┘          └─────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use conveyor_core::read_model::{ProjectionError, ReadModelDocument, ReadModelStore, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

/// `PostgreSQL`-backed read-model store.
///
/// # Example
///
/// ```ignore
/// use conveyor_projections::PostgresReadModelStore;
///
/// // Share pool with the write side (simple setup)
/// let store = PostgresReadModelStore::new(pool);
///
/// // Or use a separate database (CQRS separation)
/// let store = PostgresReadModelStore::new_with_separate_db(
///     "postgres://localhost/read_models",
/// ).await?;
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresReadModelStore {
    pool: PgPool,
}

impl PostgresReadModelStore {
    /// Create a store using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a store with its own database connection.
    ///
    /// Keeps the read side on a separate database from the write side.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the connection fails.
    pub async fn new_with_separate_db(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Run this crate's schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if a migration fails to apply.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Migration failed: {e}")))
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl ReadModelStore for PostgresReadModelStore {
    async fn upsert(&self, doc: &ReadModelDocument) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO read_models
                (aggregate_id, aggregate_type, version, document, rendered_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (aggregate_id) DO UPDATE SET
                aggregate_type = EXCLUDED.aggregate_type,
                version = EXCLUDED.version,
                document = EXCLUDED.document,
                rendered_at = EXCLUDED.rendered_at,
                updated_at = now()
            ",
        )
        .bind(&doc.aggregate_id)
        .bind(&doc.aggregate_type)
        .bind(doc.version)
        .bind(&doc.document)
        .bind(doc.rendered_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, aggregate_id: &str) -> Result<Option<ReadModelDocument>> {
        let row = sqlx::query(
            r"
            SELECT aggregate_id, aggregate_type, version, document, rendered_at
            FROM read_models
            WHERE aggregate_id = $1
            ",
        )
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        Ok(row.map(|row| {
            let rendered_at: DateTime<Utc> = row.get("rendered_at");
            ReadModelDocument {
                aggregate_id: row.get("aggregate_id"),
                aggregate_type: row.get("aggregate_type"),
                version: row.get("version"),
                document: row.get("document"),
                rendered_at,
            }
        }))
    }

    async fn tombstone(&self, aggregate_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM read_models WHERE aggregate_id = $1")
            .bind(aggregate_id)
            .execute(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            // Absent documents are not an error; the tombstone may race a
            // projector that never saw the aggregate
            tracing::debug!(aggregate_id = aggregate_id, "Tombstone for absent document");
        }

        Ok(())
    }

    async fn exists(&self, aggregate_id: &str) -> Result<bool> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM read_models WHERE aggregate_id = $1)")
                .bind(aggregate_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        Ok(exists)
    }
}
