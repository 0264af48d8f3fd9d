//! Shared fixtures for the coordination tests.

#![allow(dead_code)]

use async_trait::async_trait;
use coordinated_consumer::{
    ConsumerError, CoordinatedConsumer, EventRecord, Handler, LedgerTransaction, LoopSettings,
    MemoryLedger, MemoryLog, Outcome, TelemetrySink,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TOPIC: &str = "events";

/// What the scripted handler does on one call for an event id.
#[derive(Debug, Clone)]
pub enum Step {
    Commit,
    Abort(&'static str),
    Fail(&'static str),
    Sleep(Duration),
}

/// Handler that records every event in the ledger transaction, then follows a
/// per-event script (default: commit).
#[derive(Clone, Default)]
pub struct ScriptedHandler {
    script: Arc<Mutex<HashMap<String, VecDeque<Step>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `step` for the next unscripted call with `event_id`.
    pub fn then(&self, event_id: &str, step: Step) -> &Self {
        self.script
            .lock()
            .unwrap()
            .entry(event_id.to_string())
            .or_default()
            .push_back(step);
        self
    }

    /// Event ids in the order they were handled.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl<T: LedgerTransaction> Handler<T> for ScriptedHandler {
    async fn handle(&self, event: &EventRecord, transaction: &mut T) -> anyhow::Result<Outcome> {
        self.calls.lock().unwrap().push(event.id.clone());
        let step = self
            .script
            .lock()
            .unwrap()
            .get_mut(&event.id)
            .and_then(|steps| steps.pop_front())
            .unwrap_or(Step::Commit);

        transaction.record(event)?;

        match step {
            Step::Commit => Ok(Outcome::Commit),
            Step::Abort(reason) => Ok(Outcome::abort(reason)),
            Step::Fail(message) => Err(anyhow::anyhow!(message)),
            Step::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                Ok(Outcome::Commit)
            }
        }
    }
}

/// Telemetry sink that keeps `(kind, message)` of every reported error.
#[derive(Clone, Default)]
pub struct RecordingTelemetry {
    records: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingTelemetry {
    pub fn kinds(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|(kind, _)| kind.clone())
            .collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record_exception(&self, error: &ConsumerError) {
        self.records
            .lock()
            .unwrap()
            .push((error.kind().to_string(), error.to_string()));
    }
}

pub type TestConsumer =
    CoordinatedConsumer<MemoryLog, MemoryLedger, ScriptedHandler, RecordingTelemetry>;

/// Handles to everything a test needs to inspect alongside the consumer.
pub struct Fixture {
    pub log: MemoryLog,
    pub ledger: MemoryLedger,
    pub handler: ScriptedHandler,
    pub telemetry: RecordingTelemetry,
}

impl Fixture {
    pub fn new(partitions: usize) -> Self {
        Self {
            log: MemoryLog::new(TOPIC, partitions),
            ledger: MemoryLedger::new(),
            handler: ScriptedHandler::new(),
            telemetry: RecordingTelemetry::default(),
        }
    }

    pub fn consumer(&self) -> TestConsumer {
        self.consumer_with(LoopSettings::new(TOPIC))
    }

    pub fn consumer_with(&self, settings: LoopSettings) -> TestConsumer {
        CoordinatedConsumer::new(
            self.log.clone(),
            self.ledger.clone(),
            self.handler.clone(),
            self.telemetry.clone(),
            settings,
        )
    }
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("coordinated_consumer=debug")
        .with_test_writer()
        .try_init()
        .ok();
}
