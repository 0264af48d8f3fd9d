use crate::source::{Offset, TopicPartition};
use event_codec::CodecError;
use thiserror::Error;

/// Errors surfaced by one iteration of the consumer loop.
///
/// An explicit abort from the handler is not an error: it is carried by
/// [`crate::Outcome::Abort`] and resolved by rolling the offset back.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error(transparent)]
    MalformedRecord(#[from] CodecError),

    #[error("Message at {partition}@{offset} has no payload")]
    EmptyPayload {
        partition: TopicPartition,
        offset: Offset,
    },

    #[error("Transient log fault: {0}")]
    TransientLogFault(String),

    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Handler failed: {0:#}")]
    Handler(anyhow::Error),

    #[error("Local transaction error: {0:#}")]
    LocalTransaction(anyhow::Error),

    /// The log offset is durable but the local effect is not.
    #[error(
        "Offset {offset} committed on {partition} but the local transaction failed to complete: {cause:#}"
    )]
    CoordinationGap {
        partition: TopicPartition,
        offset: Offset,
        cause: anyhow::Error,
    },

    #[error("Consumer cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ConsumerError {
    /// Short, stable label for logs and telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            ConsumerError::MalformedRecord(_) => "malformed_record",
            ConsumerError::EmptyPayload { .. } => "empty_payload",
            ConsumerError::TransientLogFault(_) | ConsumerError::Kafka(_) => {
                "transient_log_fault"
            }
            ConsumerError::Handler(_) => "handler_failed",
            ConsumerError::LocalTransaction(_) => "local_transaction",
            ConsumerError::CoordinationGap { .. } => "coordination_gap",
            ConsumerError::Cancelled => "cancelled",
            ConsumerError::InvalidConfig(_) => "invalid_config",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConsumerError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, ConsumerError>;
