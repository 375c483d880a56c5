//! Outbox relay and idempotent inbound consumer for the Conveyor pipeline.
//!
//! Two halves of reliable propagation live here:
//!
//! - [`OutboxRelay`] drains the transactional outbox to the message bus on a
//!   fixed poll interval, with bounded per-message retries and parking.
//! - [`ConsumerWorker`] drives a bus subscription through an
//!   [`IdempotentConsumer`], coupling each business effect to the
//!   processed-event ledger in one transaction and routing terminal
//!   failures to dead letters.
//!
//! Both run until signaled through their `watch` shutdown channel, in the
//! same task shape: spawn, hold the sender, send `true` to stop.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod consumer;
pub mod relay;

pub use consumer::{BusinessEffect, ConsumerWorker, HandlerRegistry, IdempotentConsumer};
pub use relay::{OutboxRelay, TickStats};
