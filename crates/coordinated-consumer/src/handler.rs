//! Business-logic seam.

use async_trait::async_trait;
use event_codec::EventRecord;

/// Result of handling one event.
///
/// `Abort` is the expected way to discard the local work and have the event
/// redelivered; it is kept apart from the error channel so that unrelated failures
/// can never trigger the offset rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Keep the side effect and advance the offset
    Commit,
    /// Discard the side effect and keep the offset where it was
    Abort { reason: String },
}

impl Outcome {
    pub fn abort(reason: impl Into<String>) -> Self {
        Outcome::Abort {
            reason: reason.into(),
        }
    }

    pub fn is_commit(&self) -> bool {
        matches!(self, Outcome::Commit)
    }
}

/// Processes one decoded event inside the local transaction `T`.
///
/// The handler must be idempotent against an earlier attempt that applied its
/// effect but crashed before the log offset became durable. Side effects outside
/// `transaction` (network calls, for example) are not rolled back.
#[async_trait]
pub trait Handler<T: Send>: Send + Sync {
    /// Returning `Err` is a generic fault: the loop backs off and retries, it does
    /// not roll the offset back.
    async fn handle(&self, event: &EventRecord, transaction: &mut T) -> anyhow::Result<Outcome>;
}
