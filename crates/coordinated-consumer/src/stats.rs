//! Iteration counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counts how iterations of the loop ended.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    committed: AtomicU64,
    rolled_back: AtomicU64,
    faulted: AtomicU64,
}

/// Point-in-time copy of [`ConsumerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub committed: u64,
    pub rolled_back: u64,
    pub faulted: u64,
}

impl ConsumerStats {
    pub fn record_commit(&self) -> u64 {
        self.committed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_rollback(&self) -> u64 {
        self.rolled_back.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_fault(&self) -> u64 {
        self.faulted.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            committed: self.committed.load(Ordering::SeqCst),
            rolled_back: self.rolled_back.load(Ordering::SeqCst),
            faulted: self.faulted.load(Ordering::SeqCst),
        }
    }
}
