//! End-to-end tests of the coordination protocol over the in-memory log.

mod common;

use common::{init_tracing, Fixture, Step, TOPIC};
use coordinated_consumer::{
    CancellationToken, ConsumerError, CoordinatedConsumer, Disposition, EventRecord,
    LedgerTransaction, LocalTransaction, LoopSettings, Offset, StatsSnapshot, TopicPartition,
    Transactor,
};
use std::time::Duration;

fn tp(partition: i32) -> TopicPartition {
    TopicPartition::new(TOPIC, partition)
}

#[tokio::test]
async fn test_commit_advances_durable_offset() {
    init_tracing();
    let fixture = Fixture::new(1);
    let offset = fixture.log.append(0, "e1|c1|p1|hello").unwrap();
    let consumer = fixture.consumer();

    let disposition = consumer
        .poll_once(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        disposition,
        Disposition::Committed {
            partition: tp(0),
            offset: offset.next(),
        }
    );
    assert_eq!(fixture.log.committed(0), Some(Offset(1)));

    let row = fixture.ledger.get("e1").unwrap().unwrap();
    assert_eq!(row.event, EventRecord::new("e1", "c1", "p1", "hello"));
    assert_eq!(consumer.stats().committed, 1);
    assert!(fixture.telemetry.kinds().is_empty());
}

#[tokio::test]
async fn test_abort_restores_offset_and_redelivers() {
    init_tracing();
    let fixture = Fixture::new(1);
    fixture.log.append(0, "e0|c0|p0|first").unwrap();
    fixture.log.append(0, "e1|c1|p1|hello").unwrap();
    fixture.handler.then("e1", Step::Abort("stock reservation conflict"));
    let consumer = fixture.consumer();
    let cancel = CancellationToken::new();

    consumer.poll_once(&cancel).await.unwrap();
    let before = fixture.log.committed(0);
    assert_eq!(before, Some(Offset(1)));

    let disposition = consumer.poll_once(&cancel).await.unwrap();
    assert_eq!(
        disposition,
        Disposition::RolledBack {
            partition: tp(0),
            restored: before,
            reason: "stock reservation conflict".to_string(),
        }
    );
    assert_eq!(fixture.log.committed(0), before);
    assert!(!fixture.ledger.contains("e1").unwrap());

    // The restore is committed explicitly, at the unchanged position.
    assert_eq!(
        fixture.log.commit_history(),
        vec![(tp(0), Offset(1)), (tp(0), Offset(1))]
    );

    let redelivered = consumer.poll_once(&cancel).await.unwrap();
    assert_eq!(
        redelivered,
        Disposition::Committed {
            partition: tp(0),
            offset: Offset(2),
        }
    );
    assert_eq!(fixture.handler.calls(), vec!["e0", "e1", "e1"]);
    assert!(fixture.ledger.contains("e1").unwrap());

    let stats = consumer.stats();
    assert_eq!(stats.committed, 2);
    assert_eq!(stats.rolled_back, 1);
}

#[tokio::test]
async fn test_abort_without_prior_commit_leaves_partition_uncommitted() {
    let fixture = Fixture::new(1);
    fixture.log.append(0, "e1|c1|p1|hello").unwrap();
    fixture.handler.then("e1", Step::Abort("not yet"));
    let consumer = fixture.consumer();

    let disposition = consumer
        .poll_once(&CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(
        disposition,
        Disposition::RolledBack { restored: None, .. }
    ));
    assert_eq!(fixture.log.committed(0), None);
    assert_eq!(fixture.log.staged(0), None);
    assert!(fixture.log.commit_history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_record_is_retried_without_advancing() {
    init_tracing();
    let fixture = Fixture::new(1);
    fixture.log.append(0, "bad|only|three").unwrap();
    let consumer = fixture.consumer();
    let stats = consumer.stats_handle();

    let cancel = CancellationToken::new();
    let handle = consumer.spawn(cancel.clone());

    // Faults at t=0s, 10s and 20s; the consumer is in its backoff at t=25s.
    tokio::time::sleep(Duration::from_secs(25)).await;
    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(stats.snapshot().faulted, 3);
    assert_eq!(fixture.telemetry.kinds(), vec!["malformed_record"; 3]);
    assert!(fixture.telemetry.messages()[0].contains("found 3"));
    assert_eq!(fixture.log.committed(0), None);
    assert_eq!(fixture.log.staged(0), None);
    assert!(fixture.handler.calls().is_empty());
    assert!(fixture.ledger.is_empty().unwrap());
}

#[tokio::test]
async fn test_cancel_while_blocked_in_consume() {
    let fixture = Fixture::new(1);
    let consumer = fixture.consumer();
    let stats = consumer.stats_handle();
    let cancel = CancellationToken::new();
    let handle = consumer.spawn(cancel.clone());

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("consumer did not stop after cancellation")
        .unwrap();

    assert_eq!(stats.snapshot(), StatsSnapshot::default());
    assert!(fixture.log.commit_history().is_empty());
    assert!(fixture.telemetry.kinds().is_empty());
}

#[tokio::test]
async fn test_poll_once_reports_cancellation() {
    let fixture = Fixture::new(1);
    let consumer = fixture.consumer();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = consumer.poll_once(&cancel).await.unwrap_err();
    assert!(matches!(err, ConsumerError::Cancelled));
}

#[tokio::test]
async fn test_handler_fault_does_not_advance_and_redelivers() {
    let fixture = Fixture::new(1);
    fixture.log.append(0, "e1|c1|p1|hello").unwrap();
    fixture.handler.then("e1", Step::Fail("database unavailable"));
    let consumer = fixture.consumer();
    let cancel = CancellationToken::new();

    let err = consumer.poll_once(&cancel).await.unwrap_err();
    assert_eq!(err.kind(), "handler_failed");
    assert!(err.to_string().contains("database unavailable"));
    assert_eq!(fixture.log.committed(0), None);
    assert!(!fixture.ledger.contains("e1").unwrap());

    let disposition = consumer.poll_once(&cancel).await.unwrap();
    assert!(matches!(disposition, Disposition::Committed { .. }));
    assert_eq!(fixture.handler.calls(), vec!["e1", "e1"]);
    assert_eq!(fixture.log.committed(0), Some(Offset(1)));
    assert_eq!(fixture.ledger.len().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transaction_timeout_is_an_abort() {
    let fixture = Fixture::new(1);
    fixture.log.append(0, "e1|c1|p1|hello").unwrap();
    fixture.handler.then("e1", Step::Sleep(Duration::from_secs(5)));
    let consumer = fixture
        .consumer_with(LoopSettings::new(TOPIC).with_transaction_timeout(Duration::from_secs(1)));

    let disposition = consumer
        .poll_once(&CancellationToken::new())
        .await
        .unwrap();

    match disposition {
        Disposition::RolledBack { reason, .. } => assert!(reason.contains("timed out")),
        other => panic!("expected rollback, got {other:?}"),
    }
    assert!(fixture.ledger.is_empty().unwrap());
    assert_eq!(fixture.log.committed(0), None);
}

#[tokio::test]
async fn test_commit_failure_discards_local_work() {
    let fixture = Fixture::new(1);
    fixture.log.append(0, "e1|c1|p1|hello").unwrap();
    fixture.log.fail_next_commits(1);
    let consumer = fixture.consumer();
    let cancel = CancellationToken::new();

    let err = consumer.poll_once(&cancel).await.unwrap_err();
    assert_eq!(err.kind(), "transient_log_fault");
    assert!(fixture.ledger.is_empty().unwrap());
    assert_eq!(fixture.log.committed(0), None);

    consumer.poll_once(&cancel).await.unwrap();
    assert_eq!(fixture.log.committed(0), Some(Offset(1)));
    assert_eq!(fixture.ledger.len().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_poll_faults_back_off_then_recover() {
    let fixture = Fixture::new(1);
    fixture.log.append(0, "e1|c1|p1|hello").unwrap();
    fixture.log.fail_next_consumes(2);
    let consumer = fixture.consumer();
    let stats = consumer.stats_handle();
    let cancel = CancellationToken::new();
    let handle = consumer.spawn(cancel.clone());

    // Faults at t=0s and t=10s, commit at t=20s, then idle in consume.
    tokio::time::sleep(Duration::from_secs(25)).await;
    cancel.cancel();
    handle.await.unwrap();

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.faulted, 2);
    assert_eq!(snapshot.committed, 1);
    assert_eq!(
        fixture.telemetry.kinds(),
        vec!["transient_log_fault", "transient_log_fault"]
    );
    assert_eq!(fixture.log.committed(0), Some(Offset(1)));
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_failure_is_retried() {
    let fixture = Fixture::new(1);
    fixture.log.append(0, "e1|c1|p1|hello").unwrap();
    fixture.log.fail_next_subscribes(1);
    let consumer = fixture.consumer_with(
        LoopSettings::new(TOPIC).with_retry_backoff(Duration::from_secs(3)),
    );
    let stats = consumer.stats_handle();
    let cancel = CancellationToken::new();
    let handle = consumer.spawn(cancel.clone());

    tokio::time::sleep(Duration::from_secs(5)).await;
    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(stats.snapshot().faulted, 1);
    assert_eq!(stats.snapshot().committed, 1);
    assert!(fixture.log.subscribe_calls() >= 2);
}

#[tokio::test]
async fn test_each_message_advances_offset_exactly_once() {
    let fixture = Fixture::new(2);
    for (partition, id) in [(0, "a1"), (1, "b1"), (0, "a2"), (1, "b2"), (0, "a3")] {
        fixture
            .log
            .append(partition, format!("{id}|corr|cause|payload-{id}"))
            .unwrap();
    }
    fixture.handler.then("a2", Step::Abort("retry later"));
    fixture.handler.then("b1", Step::Fail("flaky downstream"));
    let consumer = fixture.consumer();
    let cancel = CancellationToken::new();

    let mut iterations = 0;
    while consumer.stats().committed < 5 {
        iterations += 1;
        assert!(iterations <= 20, "consumer did not converge");
        let _ = consumer.poll_once(&cancel).await;
    }

    assert_eq!(fixture.log.committed(0), Some(Offset(3)));
    assert_eq!(fixture.log.committed(1), Some(Offset(2)));
    assert_eq!(fixture.ledger.len().unwrap(), 5);

    for partition in [0, 1] {
        let positions: Vec<i64> = fixture
            .log
            .commit_history()
            .into_iter()
            .filter(|(tp, _)| tp.partition == partition)
            .map(|(_, offset)| offset.0)
            .collect();
        assert!(positions.windows(2).all(|w| w[0] <= w[1]));

        let mut advancing = positions.clone();
        advancing.dedup();
        let messages = if partition == 0 { 3 } else { 2 };
        assert_eq!(advancing.len(), messages);
    }
}

#[tokio::test]
async fn test_concurrent_polls_are_serialized() {
    let fixture = Fixture::new(1);
    fixture.log.append(0, "e0|c0|p0|slow").unwrap();
    fixture.log.append(0, "e1|c1|p1|broken").unwrap();
    fixture.handler.then("e0", Step::Sleep(Duration::from_millis(10)));
    fixture.handler.then("e1", Step::Fail("boom"));
    let consumer = fixture.consumer();
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(consumer.poll_once(&cancel), consumer.poll_once(&cancel));

    assert_eq!(
        first.unwrap(),
        Disposition::Committed {
            partition: tp(0),
            offset: Offset(1),
        }
    );
    assert_eq!(second.unwrap_err().kind(), "handler_failed");
    // The failed event's offset must not ride along with the other commit.
    assert_eq!(fixture.log.committed(0), Some(Offset(1)));
    assert!(!fixture.ledger.contains("e1").unwrap());

    let retried = consumer.poll_once(&cancel).await.unwrap();
    assert_eq!(
        retried,
        Disposition::Committed {
            partition: tp(0),
            offset: Offset(2),
        }
    );
    assert!(fixture.ledger.contains("e1").unwrap());
}

#[tokio::test]
async fn test_redelivered_event_already_in_ledger_is_not_duplicated() {
    let fixture = Fixture::new(1);
    fixture.log.append(0, "e1|c1|p1|hello").unwrap();

    // A previous attempt applied the effect, but its offset never became durable.
    let mut transaction = fixture.ledger.begin().unwrap();
    transaction
        .record(&EventRecord::new("e1", "c1", "p1", "hello"))
        .unwrap();
    transaction.commit().unwrap();
    let first = fixture.ledger.get("e1").unwrap().unwrap();

    let consumer = fixture.consumer();
    consumer.poll_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(fixture.ledger.len().unwrap(), 1);
    assert_eq!(fixture.ledger.get("e1").unwrap().unwrap(), first);
    assert_eq!(fixture.log.committed(0), Some(Offset(1)));
}

#[tokio::test]
async fn test_restart_resumes_from_last_durable_commit() {
    let fixture = Fixture::new(1);
    fixture.log.append(0, "e1|c1|p1|one").unwrap();
    fixture.log.append(0, "e2|c2|p2|two").unwrap();
    fixture.handler.then("e2", Step::Fail("crash"));
    let cancel = CancellationToken::new();

    let consumer = fixture.consumer();
    consumer.poll_once(&cancel).await.unwrap();
    assert!(consumer.poll_once(&cancel).await.is_err());
    drop(consumer);

    fixture.log.restart_from_committed();
    let restarted = fixture.consumer();
    let disposition = restarted.poll_once(&cancel).await.unwrap();

    assert_eq!(
        disposition,
        Disposition::Committed {
            partition: tp(0),
            offset: Offset(2),
        }
    );
    assert_eq!(fixture.handler.calls(), vec!["e1", "e2", "e2"]);
}

mod coordination_gap {
    use super::*;
    use crate::common::{RecordingTelemetry, ScriptedHandler};
    use coordinated_consumer::MemoryLog;

    /// Ledger whose local commit always fails.
    struct BrokenLedger;

    struct BrokenTransaction;

    impl LocalTransaction for BrokenTransaction {
        fn commit(&mut self) -> anyhow::Result<()> {
            anyhow::bail!("fsync failed")
        }

        fn rollback(&mut self) {}
    }

    impl LedgerTransaction for BrokenTransaction {
        fn contains(&self, _event_id: &str) -> anyhow::Result<bool> {
            Ok(false)
        }

        fn record(&mut self, _event: &EventRecord) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl Transactor for BrokenLedger {
        type Transaction = BrokenTransaction;

        fn begin(&self) -> anyhow::Result<BrokenTransaction> {
            Ok(BrokenTransaction)
        }
    }

    #[tokio::test]
    async fn test_local_failure_after_log_commit_is_flagged() {
        let log = MemoryLog::new(TOPIC, 1);
        log.append(0, "e1|c1|p1|hello").unwrap();
        let consumer = CoordinatedConsumer::new(
            log.clone(),
            BrokenLedger,
            ScriptedHandler::new(),
            RecordingTelemetry::default(),
            LoopSettings::new(TOPIC),
        );

        let err = consumer
            .poll_once(&CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "coordination_gap");
        assert!(matches!(
            err,
            ConsumerError::CoordinationGap { offset: Offset(1), .. }
        ));
        // Reported, not undone: the log offset stays durable.
        assert_eq!(log.committed(0), Some(Offset(1)));

        // Resumes after the durable position instead of redelivering the message.
        assert_eq!(log.pending(), 0);
        log.append(0, "e2|c2|p2|next").unwrap();
        let next = consumer
            .poll_once(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            next,
            ConsumerError::CoordinationGap { offset: Offset(2), .. }
        ));
    }
}
