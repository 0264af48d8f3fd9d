//! Kafka consumer loop with exactly-once effective processing.
//!
//! The log only delivers at-least-once, and there is no atomic commit spanning the
//! broker's offset store and the local side-effect store. This crate coordinates the
//! two so that every event has exactly one effective processing:
//!
//! 1. capture the partition's durable position (the rollback anchor)
//! 2. open a local transaction and speculatively store the message's offset
//! 3. run the handler inside the transaction
//! 4. on [`Outcome::Commit`], commit the log offset, then complete the transaction
//! 5. on [`Outcome::Abort`], restore the anchor, commit it, and rewind for redelivery
//!
//! Any other failure is reported to telemetry and retried after a fixed backoff.
//!
//! # Known gap
//!
//! A crash after the log commit and before the local transaction completes leaves the
//! offset advanced without the local effect. This window is accepted, not solved;
//! handlers must also tolerate redelivery of an event whose effect was already
//! applied (see [`ledger`] for an idempotency ledger).
//!
//! # Collaborators
//!
//! - [`LogSource`] - the broker client ([`KafkaLog`], or [`MemoryLog`] in-process)
//! - [`Transactor`] - the local transactional store ([`MemoryLedger`], [`FilesystemLedger`])
//! - [`Handler`] - the business logic
//! - [`TelemetrySink`] - fire-and-forget exception reporting

pub mod config;

/// The coordination loop itself
pub mod consumer;
pub mod error;
pub mod handler;

/// rdkafka-backed log source
pub mod kafka;

/// Transactional processed-event ledgers
pub mod ledger;
pub mod memory;
mod offsets;
pub mod source;
pub mod stats;
pub mod telemetry;
pub mod transaction;

pub use config::{parse_duration, Config};
pub use consumer::{CoordinatedConsumer, Disposition, LoopSettings};
pub use error::{ConsumerError, Result};
pub use handler::{Handler, Outcome};
pub use kafka::KafkaLog;
pub use ledger::{FilesystemLedger, LedgerTransaction, MemoryLedger, ProcessedEvent};
pub use memory::MemoryLog;
pub use offsets::OffsetStaging;
pub use source::{LogMessage, LogSource, Offset, TopicPartition};
pub use stats::{ConsumerStats, StatsSnapshot};
pub use telemetry::{TelemetrySink, TracingTelemetry};
pub use transaction::{LocalTransaction, TransactionScope, Transactor};

// Re-export the codec so handlers don't need a separate dependency
pub use event_codec::{self, CodecError, EventRecord};

// Cancellation is part of the public surface of `consume` and `run`
pub use tokio_util::sync::CancellationToken;
