//! Ledger-backed event handler.

use async_trait::async_trait;
use coordinated_consumer::{EventRecord, Handler, LedgerTransaction, Outcome};
use tracing::info;

/// Records every event in the processed-event ledger.
///
/// An event whose id is already in the ledger was applied by an earlier delivery,
/// so it is acknowledged without writing again.
#[derive(Debug, Clone, Default)]
pub struct LedgerHandler;

impl LedgerHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<T: LedgerTransaction> Handler<T> for LedgerHandler {
    async fn handle(&self, event: &EventRecord, transaction: &mut T) -> anyhow::Result<Outcome> {
        if transaction.contains(&event.id)? {
            info!(event_id = %event.id, "Event already processed, skipping");
            return Ok(Outcome::Commit);
        }

        transaction.record(event)?;
        info!(
            event_id = %event.id,
            correlation_id = %event.correlation_id,
            causation_id = %event.causation_id,
            "Recorded event"
        );
        Ok(Outcome::Commit)
    }
}
