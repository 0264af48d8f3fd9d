use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer as RdkafkaConsumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message as RdkafkaMessage};
use rdkafka::{Offset as KafkaOffset, TopicPartitionList};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{ConsumerError, Result};
use crate::offsets::OffsetStaging;
use crate::source::{LogMessage, LogSource, Offset, TopicPartition};

/// Kafka log source with manual offset management.
///
/// The client's auto-commit and offset store are disabled. Stored positions are
/// staged locally and committed synchronously as an explicit partition list, so a
/// commit only ever writes the partition the loop asked for.
pub struct KafkaLog {
    consumer: StreamConsumer,
    staging: OffsetStaging,
    subscribed: Mutex<Option<String>>,
    position_timeout: Duration,
}

impl KafkaLog {
    /// Create a consumer from the CLI configuration.
    pub fn new(config: &Config) -> Result<Self> {
        Self::from_client_config(&config.client_config(), config.position_timeout)
    }

    /// Create a consumer from a prepared librdkafka configuration.
    ///
    /// The caller is responsible for disabling `enable.auto.commit` and
    /// `enable.auto.offset.store`.
    pub fn from_client_config(
        client_config: &ClientConfig,
        position_timeout: Duration,
    ) -> Result<Self> {
        let consumer: StreamConsumer = client_config.create().map_err(|e| {
            ConsumerError::TransientLogFault(format!("Failed to create consumer: {e}"))
        })?;

        Ok(Self {
            consumer,
            staging: OffsetStaging::new(),
            subscribed: Mutex::new(None),
            position_timeout,
        })
    }

    /// Get the underlying consumer (for advanced use cases)
    pub fn inner(&self) -> &StreamConsumer {
        &self.consumer
    }

    fn detach(msg: &BorrowedMessage<'_>) -> LogMessage {
        LogMessage {
            partition: TopicPartition::new(msg.topic(), msg.partition()),
            offset: Offset(msg.offset()),
            key: msg.key().map(|k| k.to_vec()),
            payload: msg.payload().map(|p| p.to_vec()),
            timestamp: msg.timestamp().to_millis(),
        }
    }
}

#[async_trait]
impl LogSource for KafkaLog {
    async fn subscribe(&self, topic: &str) -> Result<()> {
        let mut subscribed = self
            .subscribed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if subscribed.as_deref() == Some(topic) {
            return Ok(());
        }

        self.consumer.subscribe(&[topic]).map_err(|e| {
            ConsumerError::TransientLogFault(format!("Failed to subscribe to topic: {e}"))
        })?;
        info!("Subscribed to topic '{topic}'");
        *subscribed = Some(topic.to_string());
        Ok(())
    }

    async fn consume(&self, cancel: &CancellationToken) -> Result<LogMessage> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ConsumerError::Cancelled),
            received = self.consumer.recv() => {
                let msg = received.map_err(|e| {
                    ConsumerError::TransientLogFault(format!("Error receiving message: {e}"))
                })?;
                Ok(Self::detach(&msg))
            }
        }
    }

    async fn position(&self, partition: &TopicPartition) -> Result<Option<Offset>> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(&partition.topic, partition.partition);

        let committed = self
            .consumer
            .committed_offsets(tpl, self.position_timeout)
            .map_err(|e| {
                ConsumerError::TransientLogFault(format!(
                    "Failed to read committed offset of {partition}: {e}"
                ))
            })?;

        let offset = committed
            .find_partition(&partition.topic, partition.partition)
            .and_then(|elem| match elem.offset() {
                KafkaOffset::Offset(offset) => Some(Offset(offset)),
                _ => None,
            });
        debug!(partition = %partition, ?offset, "Read committed position");
        Ok(offset)
    }

    async fn store_offset(&self, message: &LogMessage) -> Result<()> {
        self.staging
            .stage(&message.partition, message.next_offset());
        Ok(())
    }

    async fn restore_offset(
        &self,
        partition: &TopicPartition,
        offset: Option<Offset>,
    ) -> Result<()> {
        self.staging.restore(partition, offset);
        Ok(())
    }

    async fn commit(&self, partition: &TopicPartition) -> Result<()> {
        let Some(offset) = self.staging.staged(partition) else {
            debug!(partition = %partition, "Nothing staged, commit is a no-op");
            return Ok(());
        };

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &partition.topic,
            partition.partition,
            KafkaOffset::Offset(offset.0),
        )?;
        self.consumer.commit(&tpl, CommitMode::Sync)?;
        debug!(partition = %partition, offset = %offset, "Committed offset");
        Ok(())
    }

    async fn seek(&self, partition: &TopicPartition, offset: Offset) -> Result<()> {
        self.consumer
            .seek(
                &partition.topic,
                partition.partition,
                KafkaOffset::Offset(offset.0),
                self.position_timeout,
            )
            .map_err(|e| {
                ConsumerError::TransientLogFault(format!(
                    "Failed to seek {partition} to {offset}: {e}"
                ))
            })?;
        debug!(partition = %partition, offset = %offset, "Rewound fetch position");
        Ok(())
    }
}
