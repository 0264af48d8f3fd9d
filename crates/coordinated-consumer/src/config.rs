//! Consumer configuration.

use anyhow::Context;
use clap::Parser;
use rdkafka::config::ClientConfig;
use std::time::Duration;

use crate::consumer::LoopSettings;
use crate::error::{ConsumerError, Result};

/// Configuration for the coordinated Kafka consumer.
#[derive(Debug, Clone, Parser)]
pub struct Config {
    /// Kafka brokers (comma-separated or multiple --brokers)
    #[clap(long, value_delimiter = ',', required = true, env = "KAFKA_BROKERS")]
    pub brokers: Vec<String>,
    /// Consumer group ID
    #[clap(long, env = "KAFKA_GROUP_ID")]
    pub group_id: String,
    /// Topic to consume from
    #[clap(long)]
    pub topic: String,
    /// Session timeout in milliseconds
    #[clap(long, default_value = "6000")]
    pub session_timeout_ms: String,
    /// Where to start when the group has no committed offset ("earliest" or "latest")
    #[clap(long, default_value = "earliest")]
    pub auto_offset_reset: String,
    /// Fixed delay before retrying after a fault.
    /// Format: seconds or with units like "500ms", "10s", "2m"
    #[clap(long, default_value = "10s", value_parser = parse_duration)]
    pub retry_backoff: Duration,
    /// How long a handler may run before its local transaction is aborted
    #[clap(long, default_value = "60s", value_parser = parse_duration)]
    pub transaction_timeout: Duration,
    /// Timeout for reading a partition's committed offset from the broker
    #[clap(long, default_value = "5s", value_parser = parse_duration)]
    pub position_timeout: Duration,
    /// Extra librdkafka properties passed through verbatim (repeatable)
    #[clap(long = "kafka-option", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub kafka_options: Vec<(String, String)>,
}

impl Config {
    /// Settings for the coordination loop.
    pub fn settings(&self) -> Result<LoopSettings> {
        if self.topic.trim().is_empty() {
            return Err(ConsumerError::InvalidConfig(
                "topic must not be empty".to_string(),
            ));
        }
        if self.transaction_timeout.is_zero() {
            return Err(ConsumerError::InvalidConfig(
                "transaction timeout must be greater than zero".to_string(),
            ));
        }
        Ok(LoopSettings {
            topic: self.topic.clone(),
            retry_backoff: self.retry_backoff,
            transaction_timeout: self.transaction_timeout,
        })
    }

    /// librdkafka client configuration.
    ///
    /// Auto-commit and the client's own offset store are always disabled: offsets are
    /// staged and committed explicitly by the loop. Passthrough options are applied
    /// last and may override anything else.
    pub fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", self.brokers.join(","))
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", &self.session_timeout_ms)
            .set("enable.partition.eof", "false");

        for (key, value) in &self.kafka_options {
            client_config.set(key, value);
        }

        client_config
    }
}

/// Parse a duration string like "500ms", "10s", "2m", "1h" or "300".
///
/// Plain numbers are seconds.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }

    if let Some(num_str) = s.strip_suffix("ms") {
        let millis: u64 = num_str
            .parse()
            .with_context(|| format!("Invalid milliseconds value: {num_str}"))?;
        return Ok(Duration::from_millis(millis));
    }
    if let Some(num_str) = s.strip_suffix('h') {
        let hours: u64 = num_str
            .parse()
            .with_context(|| format!("Invalid hours value: {num_str}"))?;
        let secs = hours
            .checked_mul(3600)
            .with_context(|| format!("Duration too large: {s}"))?;
        return Ok(Duration::from_secs(secs));
    }
    if let Some(num_str) = s.strip_suffix('m') {
        let minutes: u64 = num_str
            .parse()
            .with_context(|| format!("Invalid minutes value: {num_str}"))?;
        let secs = minutes
            .checked_mul(60)
            .with_context(|| format!("Duration too large: {s}"))?;
        return Ok(Duration::from_secs(secs));
    }
    if let Some(num_str) = s.strip_suffix('s') {
        let secs: u64 = num_str
            .parse()
            .with_context(|| format!("Invalid seconds value: {num_str}"))?;
        return Ok(Duration::from_secs(secs));
    }

    let secs: u64 = s
        .parse()
        .with_context(|| format!("Invalid duration value: {s}"))?;
    Ok(Duration::from_secs(secs))
}

fn parse_key_value(s: &str) -> anyhow::Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .with_context(|| format!("Expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Empty key in '{s}'");
    }
    Ok((key.to_string(), value.to_string()))
}
