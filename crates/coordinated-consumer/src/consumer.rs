use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ConsumerError, Result};
use crate::handler::{Handler, Outcome};
use crate::source::{LogMessage, LogSource, Offset, TopicPartition};
use crate::stats::{ConsumerStats, StatsSnapshot};
use crate::telemetry::TelemetrySink;
use crate::transaction::{TransactionScope, Transactor};

/// Default delay before retrying after a fault.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Default lifetime of a local transaction before it is aborted.
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings of the coordination loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSettings {
    /// Topic to subscribe to
    pub topic: String,
    /// Fixed delay after a fault; no growth, no jitter
    pub retry_backoff: Duration,
    /// A handler still running after this long is treated as an abort
    pub transaction_timeout: Duration,
}

impl LoopSettings {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
        }
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn with_transaction_timeout(mut self, transaction_timeout: Duration) -> Self {
        self.transaction_timeout = transaction_timeout;
        self
    }
}

/// How a successfully coordinated iteration ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The effect was kept and `offset` is now the durable position
    Committed {
        partition: TopicPartition,
        offset: Offset,
    },
    /// The effect was discarded and the durable position left at `restored`
    RolledBack {
        partition: TopicPartition,
        restored: Option<Offset>,
        reason: String,
    },
}

/// Sequential consume/handle/commit loop with exactly-once effective processing.
///
/// Each iteration is resolved (committed, rolled back, or faulted) before the next
/// poll; concurrent calls on one consumer wait for each other. For more throughput,
/// run several instances over disjoint partitions.
pub struct CoordinatedConsumer<L, R, H, S> {
    source: L,
    transactor: R,
    handler: H,
    telemetry: S,
    settings: LoopSettings,
    stats: Arc<ConsumerStats>,
    // Held for a whole iteration; at most one transaction scope is open.
    iteration: Mutex<()>,
}

impl<L, R, H, S> CoordinatedConsumer<L, R, H, S>
where
    L: LogSource,
    R: Transactor,
    H: Handler<R::Transaction>,
    S: TelemetrySink,
{
    pub fn new(source: L, transactor: R, handler: H, telemetry: S, settings: LoopSettings) -> Self {
        Self {
            source,
            transactor,
            handler,
            telemetry,
            settings,
            stats: Arc::new(ConsumerStats::default()),
            iteration: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Shared counters, readable while the loop runs in another task.
    pub fn stats_handle(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Run until `cancel` fires.
    ///
    /// Faults never end the loop: each one is reported to telemetry, followed by
    /// the fixed backoff and a fresh poll. The backoff is cut short by cancellation.
    pub async fn run(&self, cancel: &CancellationToken) {
        let topic = &self.settings.topic;
        info!("Starting coordinated consumer on topic '{topic}'");

        while !cancel.is_cancelled() {
            match self.poll_once(cancel).await {
                Ok(_) => {}
                Err(ConsumerError::Cancelled) => break,
                Err(e) => {
                    self.stats.record_fault();
                    self.telemetry.record_exception(&e);
                    error!(
                        kind = e.kind(),
                        "Failed to consume events on topic '{topic}': {e}"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.retry_backoff) => {}
                    }
                }
            }
        }

        let stats = self.stats.snapshot();
        info!(
            committed = stats.committed,
            rolled_back = stats.rolled_back,
            faulted = stats.faulted,
            "Coordinated consumer on topic '{topic}' stopped"
        );
    }

    /// Run on a background task until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()>
    where
        Self: 'static,
    {
        tokio::spawn(async move { self.run(&cancel).await })
    }

    /// One iteration: poll a message and coordinate its processing.
    ///
    /// Faults are returned, not reported. Once a message has been claimed, a fault
    /// also rewinds its partition so that the next poll redelivers it, unless the
    /// message's offset already became durable.
    pub async fn poll_once(&self, cancel: &CancellationToken) -> Result<Disposition> {
        let _iteration = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ConsumerError::Cancelled),
            guard = self.iteration.lock() => guard,
        };

        let topic = &self.settings.topic;
        self.source.subscribe(topic).await?;

        info!("Trying to consume events on topic '{topic}'...");
        let message = self.source.consume(cancel).await?;
        debug!(
            partition = %message.partition,
            offset = %message.offset,
            "Received message"
        );

        match self.coordinate(&message).await {
            Ok(disposition) => Ok(disposition),
            Err(e @ ConsumerError::CoordinationGap { .. }) => Err(e),
            Err(e) => {
                self.rewind(&message).await;
                Err(e)
            }
        }
    }

    async fn coordinate(&self, message: &LogMessage) -> Result<Disposition> {
        let partition = &message.partition;
        let original = self.source.position(partition).await?;

        let payload = message
            .payload
            .as_deref()
            .ok_or_else(|| ConsumerError::EmptyPayload {
                partition: partition.clone(),
                offset: message.offset,
            })?;
        let event = event_codec::decode(payload)?;

        let mut scope =
            TransactionScope::begin(&self.transactor).map_err(ConsumerError::LocalTransaction)?;
        self.source.store_offset(message).await?;

        let timeout = self.settings.transaction_timeout;
        let outcome = match tokio::time::timeout(
            timeout,
            self.handler.handle(&event, scope.transaction()),
        )
        .await
        {
            Ok(result) => result.map_err(ConsumerError::Handler)?,
            Err(_) => Outcome::abort(format!("transaction timed out after {timeout:?}")),
        };

        match outcome {
            Outcome::Commit => {
                self.source.commit(partition).await?;
                // A crash here leaves the offset durable without the local effect.
                scope
                    .complete()
                    .map_err(|cause| ConsumerError::CoordinationGap {
                        partition: partition.clone(),
                        offset: message.next_offset(),
                        cause,
                    })?;

                let count = self.stats.record_commit();
                info!(
                    event_id = %event.id,
                    partition = %partition,
                    offset = %message.offset,
                    "Committed event ({count} total)"
                );
                Ok(Disposition::Committed {
                    partition: partition.clone(),
                    offset: message.next_offset(),
                })
            }
            Outcome::Abort { reason } => {
                scope.abort();
                self.source.restore_offset(partition, original).await?;
                self.source.commit(partition).await?;
                self.source.seek(partition, message.offset).await?;

                self.stats.record_rollback();
                warn!(
                    event_id = %event.id,
                    partition = %partition,
                    offset = %message.offset,
                    "Local transaction aborted, offset restored: {reason}"
                );
                Ok(Disposition::RolledBack {
                    partition: partition.clone(),
                    restored: original,
                    reason,
                })
            }
        }
    }

    async fn rewind(&self, message: &LogMessage) {
        if let Err(e) = self.source.seek(&message.partition, message.offset).await {
            warn!(
                partition = %message.partition,
                offset = %message.offset,
                "Failed to rewind after fault: {e}"
            );
        }
    }
}
