use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::init_tracing,
    mock_ledger::{block, MockLedger},
};
use anyhow::{Context, Result};
use blockpipe::sink::render_record;
use blockpipe::{FileSink, Pipeline, PipelineConfig};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

async fn run_into(path: &std::path::Path, ledger: Arc<MockLedger>, start: u64, end: u64) -> Result<()> {
    let config = PipelineConfig::builder()
        .start_block(start)
        .end_block(end)
        .handoff_capacity(3)
        .retry_delay(Duration::from_millis(1))
        .build()?;
    let sink = Arc::new(FileSink::open(path).await?);
    let pipeline = Pipeline::new(config, ledger, sink);
    timeout(Duration::from_secs(5), pipeline.run(CancellationToken::new()))
        .await
        .context("file run should finish")??;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn file_output_matches_the_rendered_records() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("blocks.log");
    let ledger = Arc::new(MockLedger::with_blocks(20));

    run_into(&path, ledger, 10, 14).await?;

    let contents = tokio::fs::read_to_string(&path).await?;
    let expected: String = (10..=14).map(|number| render_record(&block(number))).collect();
    assert_eq!(contents, expected);
    assert!(contents.starts_with("Number: 10\nHash: 0x"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replaying_a_range_produces_identical_bytes() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let first = dir.path().join("first.log");
    let second = dir.path().join("second.log");
    let ledger = Arc::new(MockLedger::with_blocks(50));
    ledger.flaky(33, 2);

    run_into(&first, ledger.clone(), 30, 40).await?;
    run_into(&second, ledger, 30, 40).await?;

    let first = tokio::fs::read(&first).await?;
    let second = tokio::fs::read(&second).await?;
    assert!(!first.is_empty());
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn consecutive_runs_append_to_the_same_file() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("blocks.log");
    let ledger = Arc::new(MockLedger::with_blocks(10));

    run_into(&path, ledger.clone(), 0, 2).await?;
    run_into(&path, ledger, 3, 4).await?;

    let contents = tokio::fs::read_to_string(&path).await?;
    let expected: String = (0..=4).map(|number| render_record(&block(number))).collect();
    assert_eq!(contents, expected);
    Ok(())
}
