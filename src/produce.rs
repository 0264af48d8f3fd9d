//! Publish wire-encoded events to Kafka.

use anyhow::{Context, Result};
use clap::Args;
use coordinated_consumer::EventRecord;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::time::Duration;

/// Arguments of the `produce` command.
#[derive(Debug, Clone, Args)]
pub struct ProduceArgs {
    /// Kafka brokers (comma-separated or multiple --brokers)
    #[arg(long, value_delimiter = ',', required = true, env = "KAFKA_BROKERS")]
    pub brokers: Vec<String>,
    /// Topic to publish to
    #[arg(long)]
    pub topic: String,
    /// Event id
    #[arg(long)]
    pub id: String,
    /// Correlation id (defaults to the event id)
    #[arg(long)]
    pub correlation_id: Option<String>,
    /// Causation id (defaults to the event id)
    #[arg(long)]
    pub causation_id: Option<String>,
    /// Event payload
    #[arg(long, default_value = "")]
    pub payload: String,
    /// Message key (defaults to the correlation id)
    #[arg(long)]
    pub key: Option<String>,
}

impl ProduceArgs {
    pub fn event(&self) -> EventRecord {
        let correlation_id = self.correlation_id.as_deref().unwrap_or(&self.id);
        let causation_id = self.causation_id.as_deref().unwrap_or(&self.id);
        EventRecord::new(&self.id, correlation_id, causation_id, &self.payload)
    }

    pub fn key(&self) -> &str {
        self.key
            .as_deref()
            .or(self.correlation_id.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Thin wrapper around a [`FutureProducer`] that publishes [`EventRecord`]s.
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &[String]) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("message.timeout.ms", "5000")
            .create()
            .context("Failed to create Kafka producer")?;
        Ok(Self { producer })
    }

    /// Publish one event and return the (partition, offset) it landed at.
    pub async fn publish(&self, topic: &str, key: &str, event: &EventRecord) -> Result<(i32, i64)> {
        let payload = event.encode();
        let record = FutureRecord::to(topic).key(key).payload(&payload);

        let (partition, offset) = self
            .producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(err, _)| err)
            .context("Failed to send event to Kafka")?;

        tracing::debug!("Published event {} to {topic}[{partition}]@{offset}", event.id);
        Ok((partition, offset))
    }
}

pub async fn run_produce(args: ProduceArgs) -> Result<()> {
    let event = args.event();
    if event.encode().matches(event_codec::DELIMITER).count() + 1 != event_codec::FIELD_COUNT {
        anyhow::bail!(
            "Event fields must not contain '{}': the record would not decode",
            event_codec::DELIMITER
        );
    }

    let producer = EventProducer::new(&args.brokers)?;
    let (partition, offset) = producer.publish(&args.topic, args.key(), &event).await?;
    println!(
        "Published event '{}' to {}[{partition}]@{offset}",
        event.id, args.topic
    );
    Ok(())
}
