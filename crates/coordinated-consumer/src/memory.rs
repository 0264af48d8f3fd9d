//! In-process partitioned log.
//!
//! Mirrors the offset semantics of [`crate::KafkaLog`]: per-partition fetch
//! positions that advance on delivery, locally staged offsets, and durable commits.
//! Faults can be injected for polls, subscriptions and commits, and the committed
//! state and commit history can be inspected, which makes it the log of choice for
//! tests and local demos.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ConsumerError, Result};
use crate::offsets::OffsetStaging;
use crate::source::{LogMessage, LogSource, Offset, TopicPartition};

#[derive(Debug, Clone)]
struct Record {
    key: Option<Vec<u8>>,
    payload: Vec<u8>,
    timestamp: i64,
}

#[derive(Debug, Default)]
struct PartitionLog {
    records: Vec<Record>,
    fetch: i64,
}

#[derive(Debug, Default)]
struct Faults {
    subscribe: u32,
    consume: u32,
    commit: u32,
}

#[derive(Debug)]
struct State {
    topic: String,
    partitions: Vec<PartitionLog>,
    subscribed: Option<String>,
    subscribe_calls: u64,
    next_partition: usize,
    committed: HashMap<i32, Offset>,
    commit_history: Vec<(TopicPartition, Offset)>,
    faults: Faults,
}

struct Inner {
    state: Mutex<State>,
    staging: OffsetStaging,
    available: Notify,
}

/// In-memory log for a single topic. Cloning yields another handle to the same log.
#[derive(Clone)]
pub struct MemoryLog {
    inner: Arc<Inner>,
}

impl MemoryLog {
    /// Create a topic with `partitions` empty partitions.
    pub fn new(topic: impl Into<String>, partitions: usize) -> Self {
        let state = State {
            topic: topic.into(),
            partitions: (0..partitions.max(1))
                .map(|_| PartitionLog::default())
                .collect(),
            subscribed: None,
            subscribe_calls: 0,
            next_partition: 0,
            committed: HashMap::new(),
            commit_history: Vec::new(),
            faults: Faults::default(),
        };
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                staging: OffsetStaging::new(),
                available: Notify::new(),
            }),
        }
    }

    pub fn topic(&self) -> String {
        self.state().topic.clone()
    }

    /// Append a record and return its offset.
    pub fn append(&self, partition: i32, payload: impl Into<Vec<u8>>) -> Result<Offset> {
        self.append_with_key(partition, None, payload)
    }

    pub fn append_with_key(
        &self,
        partition: i32,
        key: Option<Vec<u8>>,
        payload: impl Into<Vec<u8>>,
    ) -> Result<Offset> {
        let offset = {
            let mut state = self.state();
            let log = state.partition_mut(partition)?;
            log.records.push(Record {
                key,
                payload: payload.into(),
                timestamp: chrono::Utc::now().timestamp_millis(),
            });
            Offset(log.records.len() as i64 - 1)
        };
        self.inner.available.notify_one();
        Ok(offset)
    }

    /// Durable position of a partition.
    pub fn committed(&self, partition: i32) -> Option<Offset> {
        self.state().committed.get(&partition).copied()
    }

    /// Staged, not yet durable position of a partition.
    pub fn staged(&self, partition: i32) -> Option<Offset> {
        let tp = TopicPartition::new(self.topic(), partition);
        self.inner.staging.staged(&tp)
    }

    /// Every commit that reached the log, in order. Commits of an unchanged
    /// position are included.
    pub fn commit_history(&self) -> Vec<(TopicPartition, Offset)> {
        self.state().commit_history.clone()
    }

    /// Number of messages not yet handed out on any partition.
    pub fn pending(&self) -> usize {
        self.state()
            .partitions
            .iter()
            .map(|log| (log.records.len() as i64 - log.fetch).max(0) as usize)
            .sum()
    }

    pub fn subscribe_calls(&self) -> u64 {
        self.state().subscribe_calls
    }

    /// Fail the next `count` calls to `subscribe`.
    pub fn fail_next_subscribes(&self, count: u32) {
        self.state().faults.subscribe = count;
    }

    /// Fail the next `count` calls to `consume`.
    pub fn fail_next_consumes(&self, count: u32) {
        self.state().faults.consume = count;
    }

    /// Fail the next `count` calls to `commit`.
    pub fn fail_next_commits(&self, count: u32) {
        self.state().faults.commit = count;
    }

    /// Simulate a consumer restart: drop staged offsets and move every fetch
    /// position back to the partition's durable position.
    pub fn restart_from_committed(&self) {
        let topic = {
            let mut state = self.state();
            let State {
                partitions,
                committed,
                ..
            } = &mut *state;
            for (index, log) in partitions.iter_mut().enumerate() {
                log.fetch = committed.get(&(index as i32)).map_or(0, |o| o.0);
            }
            state.topic.clone()
        };
        let partitions = self.state().partitions.len();
        for partition in 0..partitions {
            self.inner
                .staging
                .restore(&TopicPartition::new(topic.clone(), partition as i32), None);
        }
        self.inner.available.notify_one();
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn try_next(&self) -> Result<Option<LogMessage>> {
        let mut state = self.state();
        if state.subscribed.is_none() {
            return Err(ConsumerError::TransientLogFault(
                "consume called before subscribe".to_string(),
            ));
        }
        if state.faults.consume > 0 {
            state.faults.consume -= 1;
            return Err(ConsumerError::TransientLogFault(
                "injected poll failure".to_string(),
            ));
        }

        let count = state.partitions.len();
        for step in 0..count {
            let index = (state.next_partition + step) % count;
            let log = &mut state.partitions[index];
            let Some(record) = log.records.get(log.fetch as usize).cloned() else {
                continue;
            };
            let offset = Offset(log.fetch);
            log.fetch += 1;
            state.next_partition = (index + 1) % count;
            return Ok(Some(LogMessage {
                partition: TopicPartition::new(state.topic.clone(), index as i32),
                offset,
                key: record.key,
                payload: Some(record.payload),
                timestamp: Some(record.timestamp),
            }));
        }
        Ok(None)
    }

    fn check_topic(&self, partition: &TopicPartition) -> Result<()> {
        let state = self.state();
        if partition.topic != state.topic {
            return Err(ConsumerError::TransientLogFault(format!(
                "unknown topic '{}'",
                partition.topic
            )));
        }
        if partition.partition < 0 || partition.partition as usize >= state.partitions.len() {
            return Err(ConsumerError::TransientLogFault(format!(
                "unknown partition {partition}"
            )));
        }
        Ok(())
    }
}

impl State {
    fn partition_mut(&mut self, partition: i32) -> Result<&mut PartitionLog> {
        let topic = self.topic.clone();
        usize::try_from(partition)
            .ok()
            .and_then(|index| self.partitions.get_mut(index))
            .ok_or_else(|| {
                ConsumerError::TransientLogFault(format!(
                    "unknown partition {}",
                    TopicPartition::new(topic, partition)
                ))
            })
    }
}

#[async_trait]
impl LogSource for MemoryLog {
    async fn subscribe(&self, topic: &str) -> Result<()> {
        let mut state = self.state();
        state.subscribe_calls += 1;
        if state.faults.subscribe > 0 {
            state.faults.subscribe -= 1;
            return Err(ConsumerError::TransientLogFault(
                "injected subscribe failure".to_string(),
            ));
        }
        if topic != state.topic {
            return Err(ConsumerError::TransientLogFault(format!(
                "unknown topic '{topic}'"
            )));
        }
        state.subscribed = Some(topic.to_string());
        Ok(())
    }

    async fn consume(&self, cancel: &CancellationToken) -> Result<LogMessage> {
        loop {
            if cancel.is_cancelled() {
                return Err(ConsumerError::Cancelled);
            }
            if let Some(message) = self.try_next()? {
                debug!(
                    partition = %message.partition,
                    offset = %message.offset,
                    "Delivered message"
                );
                return Ok(message);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ConsumerError::Cancelled),
                _ = self.inner.available.notified() => {}
            }
        }
    }

    async fn position(&self, partition: &TopicPartition) -> Result<Option<Offset>> {
        self.check_topic(partition)?;
        Ok(self.committed(partition.partition))
    }

    async fn store_offset(&self, message: &LogMessage) -> Result<()> {
        self.check_topic(&message.partition)?;
        self.inner
            .staging
            .stage(&message.partition, message.next_offset());
        Ok(())
    }

    async fn restore_offset(
        &self,
        partition: &TopicPartition,
        offset: Option<Offset>,
    ) -> Result<()> {
        self.check_topic(partition)?;
        self.inner.staging.restore(partition, offset);
        Ok(())
    }

    async fn commit(&self, partition: &TopicPartition) -> Result<()> {
        self.check_topic(partition)?;
        let mut state = self.state();
        if state.faults.commit > 0 {
            state.faults.commit -= 1;
            return Err(ConsumerError::TransientLogFault(
                "injected commit failure".to_string(),
            ));
        }
        let Some(offset) = self.inner.staging.staged(partition) else {
            debug!(partition = %partition, "Nothing staged, commit is a no-op");
            return Ok(());
        };
        state.committed.insert(partition.partition, offset);
        state.commit_history.push((partition.clone(), offset));
        Ok(())
    }

    async fn seek(&self, partition: &TopicPartition, offset: Offset) -> Result<()> {
        self.check_topic(partition)?;
        {
            let mut state = self.state();
            let log = state.partition_mut(partition.partition)?;
            log.fetch = offset.0.clamp(0, log.records.len() as i64);
        }
        self.inner.available.notify_one();
        Ok(())
    }
}
