use anyhow::anyhow;
use event_codec::EventRecord;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{LedgerTransaction, ProcessedEvent};
use crate::transaction::{LocalTransaction, Transactor};

type Rows = BTreeMap<String, ProcessedEvent>;

/// In-memory ledger. Cloning yields another handle to the same rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    rows: Arc<Mutex<Rows>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the event has been committed.
    pub fn contains(&self, event_id: &str) -> anyhow::Result<bool> {
        Ok(lock(&self.rows)?.contains_key(event_id))
    }

    pub fn get(&self, event_id: &str) -> anyhow::Result<Option<ProcessedEvent>> {
        Ok(lock(&self.rows)?.get(event_id).cloned())
    }

    pub fn len(&self) -> anyhow::Result<usize> {
        Ok(lock(&self.rows)?.len())
    }

    pub fn is_empty(&self) -> anyhow::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Committed rows ordered by event id.
    pub fn events(&self) -> anyhow::Result<Vec<ProcessedEvent>> {
        Ok(lock(&self.rows)?.values().cloned().collect())
    }
}

fn lock(rows: &Mutex<Rows>) -> anyhow::Result<MutexGuard<'_, Rows>> {
    rows.lock().map_err(|_| anyhow!("memory ledger lock poisoned"))
}

impl Transactor for MemoryLedger {
    type Transaction = MemoryLedgerTransaction;

    fn begin(&self) -> anyhow::Result<MemoryLedgerTransaction> {
        Ok(MemoryLedgerTransaction {
            rows: Arc::clone(&self.rows),
            staged: Vec::new(),
        })
    }
}

/// Open transaction against a [`MemoryLedger`].
#[derive(Debug)]
pub struct MemoryLedgerTransaction {
    rows: Arc<Mutex<Rows>>,
    staged: Vec<ProcessedEvent>,
}

impl MemoryLedgerTransaction {
    pub fn staged(&self) -> &[ProcessedEvent] {
        &self.staged
    }
}

impl LocalTransaction for MemoryLedgerTransaction {
    fn commit(&mut self) -> anyhow::Result<()> {
        let mut rows = lock(&self.rows)?;
        for row in self.staged.drain(..) {
            rows.entry(row.event.id.clone()).or_insert(row);
        }
        Ok(())
    }

    fn rollback(&mut self) {
        self.staged.clear();
    }
}

impl LedgerTransaction for MemoryLedgerTransaction {
    fn contains(&self, event_id: &str) -> anyhow::Result<bool> {
        if self.staged.iter().any(|row| row.event.id == event_id) {
            return Ok(true);
        }
        Ok(lock(&self.rows)?.contains_key(event_id))
    }

    fn record(&mut self, event: &EventRecord) -> anyhow::Result<()> {
        if !self.contains(&event.id)? {
            self.staged.push(ProcessedEvent::new(event));
        }
        Ok(())
    }
}
