use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{assert_is_contiguous, init_tracing, wait_for_saved, RecordingSink},
    mock_ledger::MockLedger,
};
use anyhow::{Context, Result};
use blockpipe::{pipeline_error, Pipeline, PipelineConfig, PipelineError, PipelineReport};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn bounded(start: u64, end: u64, capacity: usize) -> Result<PipelineConfig> {
    PipelineConfig::builder()
        .start_block(start)
        .end_block(end)
        .handoff_capacity(capacity)
        .retry_delay(Duration::from_millis(1))
        .build()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn genesis_range_is_persisted_in_order() -> Result<()> {
    init_tracing();
    let ledger = Arc::new(MockLedger::with_blocks(10));
    let sink = RecordingSink::shared();
    let pipeline = Pipeline::new(bounded(0, 2, 1)?, ledger.clone(), sink.clone());

    let report = timeout(Duration::from_secs(5), pipeline.run(CancellationToken::new()))
        .await
        .context("bounded run should finish")??;

    assert_eq!(sink.numbers(), vec![0, 1, 2]);
    assert_eq!(
        report,
        PipelineReport {
            first_queued: Some(0),
            last_queued: Some(2),
            queued: 3,
            persisted: 3,
            sink_failures: 0,
            cancelled: false,
        }
    );
    assert_eq!(ledger.number_lookups(), vec![0, 1, 2]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rendezvous_and_buffered_handoff_deliver_the_same_sequence() -> Result<()> {
    init_tracing();
    let ledger = Arc::new(MockLedger::with_blocks(200));

    for capacity in [0, 4] {
        let sink = RecordingSink::shared();
        let pipeline = Pipeline::new(bounded(100, 140, capacity)?, ledger.clone(), sink.clone());
        timeout(Duration::from_secs(5), pipeline.run(CancellationToken::new()))
            .await
            .context("bounded run should finish")??;

        let numbers = sink.numbers();
        assert_eq!(numbers.first(), Some(&100));
        assert_eq!(numbers.last(), Some(&140));
        assert_eq!(numbers.len(), 41);
        assert_is_contiguous(&numbers);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transient_fetch_failures_are_retried_in_place() -> Result<()> {
    init_tracing();
    let ledger = Arc::new(MockLedger::with_blocks(30));
    ledger.flaky(22, 3);
    let sink = RecordingSink::shared();
    let pipeline = Pipeline::new(bounded(20, 25, 0)?, ledger.clone(), sink.clone());

    timeout(Duration::from_secs(5), pipeline.run(CancellationToken::new()))
        .await
        .context("run should finish despite flaky lookups")??;

    assert_eq!(sink.numbers(), vec![20, 21, 22, 23, 24, 25]);
    let lookups_of_22 = ledger
        .number_lookups()
        .into_iter()
        .filter(|number| *number == 22)
        .count();
    assert_eq!(lookups_of_22, 4);
    assert_eq!(pipeline.telemetry().snapshot().fetch_retries, 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sink_failures_are_skipped_not_fatal() -> Result<()> {
    init_tracing();
    let ledger = Arc::new(MockLedger::with_blocks(10));
    let sink = RecordingSink::rejecting([3, 5]);
    let pipeline = Pipeline::new(bounded(1, 6, 2)?, ledger, sink.clone());

    let report = timeout(Duration::from_secs(5), pipeline.run(CancellationToken::new()))
        .await
        .context("run should finish")??;

    assert_eq!(sink.numbers(), vec![1, 2, 4, 6]);
    assert_eq!(sink.rejected(), vec![3, 5]);
    assert_eq!(report.queued, 6);
    assert_eq!(report.persisted, 4);
    assert_eq!(report.sink_failures, 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_beyond_head_is_rejected_without_fetching() -> Result<()> {
    init_tracing();
    let ledger = Arc::new(MockLedger::with_blocks(100));
    let sink = RecordingSink::shared();
    let pipeline = Pipeline::new(bounded(150, 160, 0)?, ledger.clone(), sink.clone());

    let err = pipeline
        .run(CancellationToken::new())
        .await
        .expect_err("future start must fail");

    assert!(matches!(
        pipeline_error(&err),
        Some(PipelineError::StartInFuture {
            start: 150,
            head: 100
        })
    ));
    assert!(ledger.number_lookups().is_empty());
    assert!(sink.numbers().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn future_start_waits_for_the_chain() -> Result<()> {
    init_tracing();
    let ledger = Arc::new(MockLedger::with_blocks(100));
    let sink = RecordingSink::shared();
    let config = PipelineConfig::builder()
        .start_block(103)
        .end_block(104)
        .allow_future_start(true)
        .readiness_poll_interval(Duration::from_millis(10))
        .retry_delay(Duration::from_millis(1))
        .build()?;
    let pipeline = Pipeline::new(config, ledger.clone(), sink.clone());

    let run = tokio::spawn(async move { pipeline.run(CancellationToken::new()).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sink.numbers().is_empty());
    assert!(ledger.number_lookups().is_empty());

    ledger.mine(104).await;
    wait_for_saved(&sink, 2, Duration::from_secs(5)).await?;
    let report = timeout(Duration::from_secs(5), run)
        .await
        .context("run should finish once the chain caught up")???;

    assert_eq!(sink.numbers(), vec![103, 104]);
    assert_eq!(report.first_queued, Some(103));
    Ok(())
}
