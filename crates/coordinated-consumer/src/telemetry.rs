//! Exception reporting.

use std::sync::Arc;

use crate::error::ConsumerError;

/// Fire-and-forget sink for faults caught at the loop boundary.
///
/// Implementations must not panic or block for long; a failing sink swallows its
/// own errors.
pub trait TelemetrySink: Send + Sync {
    fn record_exception(&self, error: &ConsumerError);
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Arc<T> {
    fn record_exception(&self, error: &ConsumerError) {
        (**self).record_exception(error)
    }
}

/// Reports exceptions as `tracing` error events.
#[derive(Debug, Clone, Default)]
pub struct TracingTelemetry {
    service: Option<String>,
}

impl TracingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag every record with a service name.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: Some(service.into()),
        }
    }
}

impl TelemetrySink for TracingTelemetry {
    fn record_exception(&self, error: &ConsumerError) {
        tracing::error!(
            target: "telemetry",
            service = self.service.as_deref().unwrap_or("coordinated-consumer"),
            kind = error.kind(),
            error = %error,
            "exception recorded"
        );
    }
}
