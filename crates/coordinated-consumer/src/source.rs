//! The log-source seam.
//!
//! Positions follow the Kafka convention: a position names the offset of the *next*
//! message to read, so committing a message at offset `n` makes `n + 1` durable.

use async_trait::async_trait;
use std::fmt;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A `(topic, partition)` pair that scopes offsets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

/// A position within one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Offset(pub i64);

impl Offset {
    /// The position just after this one.
    pub fn next(self) -> Offset {
        Offset(self.0 + 1)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message as delivered by the log, detached from the client's buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub partition: TopicPartition,
    /// Offset of this message within its partition
    pub offset: Offset,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    /// Milliseconds since epoch (if available)
    pub timestamp: Option<i64>,
}

impl LogMessage {
    /// Position that becomes durable when this message is committed.
    pub fn next_offset(&self) -> Offset {
        self.offset.next()
    }
}

/// Opaque partitioned log consumed by the loop.
///
/// Store and commit operations must fail loudly rather than silently do nothing.
/// One loop drives one source sequentially; implementations only need to be safe
/// for that access pattern plus concurrent inspection.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Make sure the subscription to `topic` is active. Repeated calls for the
    /// same topic must be cheap.
    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Wait for the next message.
    ///
    /// Returns [`crate::ConsumerError::Cancelled`] as soon as `cancel` fires, without
    /// claiming a message.
    async fn consume(&self, cancel: &CancellationToken) -> Result<LogMessage>;

    /// Durable (committed) position of the partition, `None` if nothing was ever
    /// committed for it.
    async fn position(&self, partition: &TopicPartition) -> Result<Option<Offset>>;

    /// Speculatively stage the message's commit position. Not durable.
    async fn store_offset(&self, message: &LogMessage) -> Result<()>;

    /// Replace the staged position of a partition, clearing it for `None`.
    async fn restore_offset(&self, partition: &TopicPartition, offset: Option<Offset>)
        -> Result<()>;

    /// Durably commit the staged position of the partition. Nothing staged means
    /// nothing to commit.
    async fn commit(&self, partition: &TopicPartition) -> Result<()>;

    /// Move the fetch position so that the next `consume` on this partition starts
    /// at `offset`. Stored and committed positions are untouched.
    async fn seek(&self, partition: &TopicPartition, offset: Offset) -> Result<()>;
}
