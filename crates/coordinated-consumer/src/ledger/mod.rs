//! Transactional ledger of processed events.
//!
//! A ledger row is written inside the same local transaction as the handler's side
//! effect. After a crash between a completed local transaction and the log commit,
//! the event is redelivered; the handler finds it in the ledger and acknowledges it
//! without applying the effect twice.
//!
//! ## Storage Backends
//!
//! - [`MemoryLedger`] - process-local, for tests and demos
//! - [`FilesystemLedger`] - JSON lines file, fsynced on every commit

mod filesystem;
mod memory;

pub use filesystem::{FilesystemLedger, FilesystemLedgerTransaction};
pub use memory::{MemoryLedger, MemoryLedgerTransaction};

use chrono::{DateTime, Utc};
use event_codec::EventRecord;
use serde::{Deserialize, Serialize};

use crate::transaction::LocalTransaction;

/// One row of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    #[serde(flatten)]
    pub event: EventRecord,
    /// Timestamp when the event's transaction was opened for recording
    pub processed_at: DateTime<Utc>,
}

impl ProcessedEvent {
    pub fn new(event: &EventRecord) -> Self {
        Self {
            event: event.clone(),
            processed_at: Utc::now(),
        }
    }
}

/// A local transaction that can read and write the processed-event ledger.
pub trait LedgerTransaction: LocalTransaction {
    /// Whether the event is committed or already staged in this transaction.
    fn contains(&self, event_id: &str) -> anyhow::Result<bool>;

    /// Stage a ledger row; visible to others only after commit.
    fn record(&mut self, event: &EventRecord) -> anyhow::Result<()>;
}
