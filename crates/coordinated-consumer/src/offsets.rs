//! Local staging of not-yet-durable offsets.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::source::{Offset, TopicPartition};

/// Staged (stored but uncommitted) positions per partition.
///
/// Both log sources keep their own staging instead of relying on the broker
/// client's offset store, so that a rollback to "never committed" can clear the
/// staged value and make the following commit a no-op.
#[derive(Debug, Default)]
pub struct OffsetStaging {
    staged: Mutex<HashMap<TopicPartition, Offset>>,
}

impl OffsetStaging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self, partition: &TopicPartition, offset: Offset) {
        self.lock().insert(partition.clone(), offset);
    }

    /// Set the staged position, or clear it when `offset` is `None`.
    pub fn restore(&self, partition: &TopicPartition, offset: Option<Offset>) {
        let mut staged = self.lock();
        match offset {
            Some(offset) => {
                staged.insert(partition.clone(), offset);
            }
            None => {
                staged.remove(partition);
            }
        }
    }

    pub fn staged(&self, partition: &TopicPartition) -> Option<Offset> {
        self.lock().get(partition).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TopicPartition, Offset>> {
        self.staged.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_and_restore() {
        let staging = OffsetStaging::new();
        let tp = TopicPartition::new("events", 0);
        assert_eq!(staging.staged(&tp), None);

        staging.stage(&tp, Offset(5));
        assert_eq!(staging.staged(&tp), Some(Offset(5)));

        staging.restore(&tp, Some(Offset(3)));
        assert_eq!(staging.staged(&tp), Some(Offset(3)));

        staging.restore(&tp, None);
        assert_eq!(staging.staged(&tp), None);
    }

    #[test]
    fn test_partitions_are_independent() {
        let staging = OffsetStaging::new();
        let p0 = TopicPartition::new("events", 0);
        let p1 = TopicPartition::new("events", 1);
        staging.stage(&p0, Offset(10));
        staging.stage(&p1, Offset(20));
        staging.restore(&p0, None);
        assert_eq!(staging.staged(&p0), None);
        assert_eq!(staging.staged(&p1), Some(Offset(20)));
    }
}
