use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{assert_is_contiguous, init_tracing, wait_for_saved, RecordingSink},
    mock_ledger::MockLedger,
};
use anyhow::{Context, Result};
use blockpipe::{pipeline_error, FollowMode, Pipeline, PipelineConfig, PipelineError};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

fn subscribed(start: u64, end: Option<u64>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .start_block(start)
        .follow_mode(FollowMode::Subscription)
        .retry_delay(Duration::from_millis(1))
        .handoff_capacity(2);
    if let Some(end) = end {
        builder = builder.end_block(end);
    }
    builder.build()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn notification_gaps_are_filled_before_the_notified_block() -> Result<()> {
    init_tracing();
    let ledger = Arc::new(MockLedger::with_blocks(5));
    let sink = RecordingSink::shared();
    let pipeline = Pipeline::new(subscribed(3, Some(12))?, ledger.clone(), sink.clone());
    let run = tokio::spawn(async move { pipeline.run(CancellationToken::new()).await });

    timeout(WAIT, ledger.wait_for_subscription())
        .await
        .context("pipeline should subscribe after the backfill")?;
    wait_for_saved(&sink, 3, WAIT).await?;

    ledger.mine(7).await;
    wait_for_saved(&sink, 5, WAIT).await?;
    ledger.mine(12).await;

    let report = timeout(WAIT, run)
        .await
        .context("run should stop at the end block")???;

    let numbers = sink.numbers();
    assert_eq!(numbers, (3..=12).collect::<Vec<_>>());
    assert_is_contiguous(&numbers);
    assert_eq!(ledger.hash_lookups(), vec![7, 12]);
    assert_eq!(report.last_queued, Some(12));
    assert!(ledger.subscription_stopped());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn notices_beyond_the_end_block_are_not_fetched() -> Result<()> {
    init_tracing();
    let ledger = Arc::new(MockLedger::with_blocks(2));
    let sink = RecordingSink::shared();
    let pipeline = Pipeline::new(subscribed(0, Some(4))?, ledger.clone(), sink.clone());
    let run = tokio::spawn(async move { pipeline.run(CancellationToken::new()).await });

    timeout(WAIT, ledger.wait_for_subscription())
        .await
        .context("pipeline should subscribe")?;
    ledger.mine(9).await;

    timeout(WAIT, run)
        .await
        .context("run should stop at the end block")???;

    assert_eq!(sink.numbers(), vec![0, 1, 2, 3, 4]);
    assert!(ledger.hash_lookups().is_empty());
    assert!(ledger.subscription_stopped());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscription_failure_aborts_the_run() -> Result<()> {
    init_tracing();
    let ledger = Arc::new(MockLedger::with_blocks(2));
    let sink = RecordingSink::shared();
    let pipeline = Pipeline::new(subscribed(0, None)?, ledger.clone(), sink.clone());
    let run = tokio::spawn(async move { pipeline.run(CancellationToken::new()).await });

    timeout(WAIT, ledger.wait_for_subscription())
        .await
        .context("pipeline should subscribe")?;
    wait_for_saved(&sink, 3, WAIT).await?;
    ledger.fail_subscription("websocket closed by peer").await?;

    let err = timeout(WAIT, run)
        .await
        .context("subscription failure should end the run")??
        .expect_err("subscription failure is fatal");

    let message = format!("{err:#}");
    assert!(
        message.contains("block processing pipeline aborted"),
        "unexpected error: {message}"
    );
    assert!(matches!(
        pipeline_error(&err),
        Some(PipelineError::SubscriptionTransport(_))
    ));
    assert_eq!(sink.numbers(), vec![0, 1, 2]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn live_subscription_starts_at_the_head() -> Result<()> {
    init_tracing();
    let ledger = Arc::new(MockLedger::with_blocks(40));
    let sink = RecordingSink::shared();
    let config = PipelineConfig::builder()
        .live(true)
        .end_block(43)
        .follow_mode(FollowMode::Subscription)
        .retry_delay(Duration::from_millis(1))
        .build()?;
    let pipeline = Pipeline::new(config, ledger.clone(), sink.clone());
    let run = tokio::spawn(async move { pipeline.run(CancellationToken::new()).await });

    timeout(WAIT, ledger.wait_for_subscription())
        .await
        .context("live pipeline should subscribe")?;
    ledger.mine(43).await;

    let report = timeout(WAIT, run)
        .await
        .context("live run should stop at the end block")???;

    assert_eq!(sink.numbers(), vec![40, 41, 42, 43]);
    assert_eq!(report.first_queued, Some(40));
    assert!(ledger.number_lookups().iter().all(|number| *number >= 40));
    Ok(())
}
