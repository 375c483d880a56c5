//! # Conveyor Core
//!
//! Core types and traits for the Conveyor event propagation pipeline.
//!
//! Conveyor is the reliable plumbing between a service's relational
//! system-of-record and everything downstream of it: a transactional outbox
//! drained to a message bus, an append-only event log, an idempotent inbound
//! consumer, and a projector that keeps denormalized read models in sync.
//!
//! ## Data flow
//!
//! ```text
//! use case transaction                      background
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │ mutate aggregate         │   │  relay: poll outbox          │
//! │ append to event log      │   │         publish to bus       │
//! │ enqueue outbox row       │──▶│         mark published       │
//! │ (optionally await        │   └───────────┬──────────────────┘
//! │  read-model projection)  │               │ (destination,
//! │ commit                   │               │  partition_key,
//! └──────────────────────────┘               ▼  payload)
//!                                ┌──────────────────────────────┐
//!                                │  consumer: ledger check      │
//!                                │            business effect   │
//!                                │            ledger insert     │
//!                                │            commit, then ack  │
//!                                └──────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Atomicity**: the aggregate mutation, event log append, and outbox
//!   write commit or roll back together.
//! - **At-least-once delivery**: unpublished outbox rows are retried until
//!   acknowledged or parked at the retry ceiling; parked rows are never
//!   silently dropped.
//! - **Per-aggregate ordering**: the partition key is the aggregate id, so
//!   the bus serializes one aggregate's events on one lane.
//! - **Exactly-once-in-effect**: the processed-event ledger absorbs the
//!   duplicates that at-least-once delivery produces.
//!
//! This crate holds only types and traits; storage lives in
//! `conveyor-postgres`, transport in `conveyor-kafka`, the background
//! processes in `conveyor-relay`, read models in `conveyor-projections`,
//! and test doubles in `conveyor-testing`.

pub mod bus;
pub mod config;
pub mod effect;
pub mod event;
pub mod event_log;
pub mod ledger;
pub mod outbox;
pub mod read_model;

pub use bus::{BusError, BusSubscription, MessageBus, PublishAck};
pub use config::{ConsumerConfig, RelayConfig};
pub use effect::{ConsumerError, EffectError, HandleOutcome};
pub use event::{DomainEvent, DomainEventBuilder, EventError};
pub use event_log::{EventLogEntry, EventLogError};
pub use ledger::{LedgerError, ProcessedEvent};
pub use outbox::{OutboxError, OutboxMessage, OutboxStore};
pub use read_model::{ProjectionError, ReadModelDocument, ReadModelStore};
