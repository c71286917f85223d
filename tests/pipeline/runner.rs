use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{assert_is_contiguous, init_tracing, wait_for_saved, RecordingSink},
    mock_ledger::MockLedger,
};
use anyhow::{Context, Result};
use blockpipe::{Pipeline, PipelineConfig, Runner};
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_an_unbounded_run_keeps_queued_blocks() -> Result<()> {
    init_tracing();
    let ledger = Arc::new(MockLedger::with_blocks(5));
    let sink = RecordingSink::shared();
    let config = PipelineConfig::builder()
        .start_block(0)
        .handoff_capacity(2)
        .retry_delay(Duration::from_millis(5))
        .build()?;
    let mut runner = Runner::new(Pipeline::new(config, ledger.clone(), sink.clone()));
    let token = runner.cancellation_token();

    let watcher = sink.clone();
    tokio::spawn(async move {
        if wait_for_saved(&watcher, 6, Duration::from_secs(5)).await.is_ok() {
            token.cancel();
        }
    });

    let report = timeout(Duration::from_secs(5), runner.run())
        .await
        .context("cancelled run should return")??;

    assert!(report.cancelled);
    assert_eq!(sink.numbers(), vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(report.persisted, 6);
    assert_eq!(report.last_queued, Some(5));
    assert!(!runner.cancellation_token().is_cancelled());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn polling_run_follows_a_growing_chain() -> Result<()> {
    init_tracing();
    let ledger = Arc::new(MockLedger::with_blocks(3));
    let sink = RecordingSink::shared();
    let config = PipelineConfig::builder()
        .start_block(1)
        .end_block(9)
        .retry_delay(Duration::from_millis(5))
        .build()?;
    let mut runner = Runner::new(Pipeline::new(config, ledger.clone(), sink.clone()));

    let miner = ledger.clone();
    tokio::spawn(async move {
        for head in 4..=9 {
            tokio::time::sleep(Duration::from_millis(15)).await;
            miner.mine(head).await;
        }
    });

    let report = timeout(Duration::from_secs(5), runner.run_until_ctrl_c())
        .await
        .context("bounded polling run should finish")??;

    let numbers = sink.numbers();
    assert_eq!(numbers.first(), Some(&1));
    assert_eq!(numbers.last(), Some(&9));
    assert_is_contiguous(&numbers);
    assert_eq!(report.persisted, 9);
    assert!(!report.cancelled);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn runner_can_be_reused_after_a_run() -> Result<()> {
    init_tracing();
    let ledger = Arc::new(MockLedger::with_blocks(8));
    let sink = RecordingSink::shared();
    let config = PipelineConfig::builder()
        .start_block(6)
        .end_block(8)
        .retry_delay(Duration::ZERO)
        .build()?;
    let mut runner = Runner::new(Pipeline::new(config, ledger, sink.clone()));

    let first = timeout(Duration::from_secs(5), runner.run())
        .await
        .context("first run should finish")??;
    let second = timeout(Duration::from_secs(5), runner.run())
        .await
        .context("second run should finish")??;

    assert_eq!(first.persisted, 3);
    assert_eq!(second.persisted, 3);
    assert_eq!(sink.numbers(), vec![6, 7, 8, 6, 7, 8]);
    assert_eq!(runner.pipeline().telemetry().snapshot().persisted_blocks, 6);
    Ok(())
}
