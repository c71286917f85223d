//! Pipeline orchestration.
//!
//! `Pipeline` wires the stages of one ingestion run together:
//! - `readiness` holds the run back until the start block exists.
//! - `backfill` replays history through the retrying `fetcher`.
//! - `reconciler` takes over in subscription mode and follows new heads.
//! - `drain` forwards everything the producer queued to the sink.
//!
//! A run spawns exactly two tasks, the producer and the drain, connected by
//! the bounded handoff channel. The producer owns the cursor for its whole
//! lifetime; the channel is closed as soon as the producer returns and both
//! tasks are joined before `run` completes.

use super::backfill::BackfillStage;
use super::backoff::RetryPolicy;
use super::drain::{DrainSummary, PersistenceDrain};
use super::fetcher::RetryingFetcher;
use super::readiness::ReadinessGate;
use super::reconciler::CatchUpReconciler;
use crate::block::BlockRecord;
use crate::handoff::{self, HandoffSender};
use crate::runtime::config::{GapFillPolicy, PipelineConfig, RunMode};
use crate::runtime::cursor::Cursor;
use crate::runtime::error::{pipeline_error, PipelineError};
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::{self, Telemetry};
use crate::sink::BlockSink;
use crate::source::BlockSource;
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Outcome of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineReport {
    /// First block queued for persistence during the run.
    pub first_queued: Option<u64>,
    /// Last block queued for persistence during the run.
    pub last_queued: Option<u64>,
    pub queued: u64,
    pub persisted: u64,
    pub sink_failures: u64,
    /// `true` when the run stopped because its shutdown token was cancelled.
    pub cancelled: bool,
}

pub struct Pipeline<S: ?Sized, K: ?Sized> {
    config: PipelineConfig,
    source: Arc<S>,
    sink: Arc<K>,
    telemetry: Arc<Telemetry>,
}

struct ProducerParams<S: ?Sized> {
    source: Arc<S>,
    handoff: HandoffSender<BlockRecord>,
    telemetry: Arc<Telemetry>,
    run_token: CancellationToken,
    fatal_handler: FatalErrorHandler,
    mode: RunMode,
    start: u64,
    end: Option<u64>,
    retry_policy: RetryPolicy,
    gap_fill_policy: GapFillPolicy,
    notification_buffer: usize,
}

impl<S, K> Pipeline<S, K>
where
    S: BlockSource + ?Sized + 'static,
    K: BlockSink + ?Sized + 'static,
{
    pub fn new(config: PipelineConfig, source: Arc<S>, sink: Arc<K>) -> Self {
        Self {
            config,
            source,
            sink,
            telemetry: Arc::new(Telemetry::default()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Counters shared by every run of this pipeline.
    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Executes one run until the end block is persisted, a fatal error
    /// occurs, or `shutdown` is cancelled.
    ///
    /// Cancellation through `shutdown` is a clean stop: records already
    /// queued are still persisted and the report is flagged `cancelled`.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<PipelineReport> {
        debug_assert!(
            self.config.validate().is_ok(),
            "PipelineConfig should have been validated at construction time"
        );

        let mode = self.config.run_mode();
        let baseline = self.telemetry.snapshot();
        let run_token = shutdown.child_token();
        let fatal_handler = FatalErrorHandler::new(run_token.clone());

        let start = match self.resolve_start(mode, &run_token).await {
            Ok(start) => start,
            Err(err) if is_cancellation(&err) => {
                tracing::info!("pipeline cancelled before the first block was fetched");
                return Ok(PipelineReport {
                    cancelled: true,
                    ..PipelineReport::default()
                });
            }
            Err(err) => return Err(err.context("pipeline failed to start")),
        };

        tracing::info!(
            ?mode,
            start,
            end = ?self.config.end_block(),
            handoff_capacity = self.config.handoff_capacity(),
            "starting block pipeline"
        );

        let metrics_handle = telemetry::spawn_metrics_reporter(
            self.telemetry.clone(),
            run_token.clone(),
            self.config.metrics_interval(),
        );

        let (handoff_tx, handoff_rx) = handoff::channel(self.config.handoff_capacity());
        let drain_handle: JoinHandle<DrainSummary> = tokio::spawn(
            PersistenceDrain::new(self.sink.clone(), self.telemetry.clone()).run(handoff_rx),
        );
        let producer_handle = tokio::spawn(produce(ProducerParams {
            source: self.source.clone(),
            handoff: handoff_tx,
            telemetry: self.telemetry.clone(),
            run_token: run_token.clone(),
            fatal_handler: fatal_handler.clone(),
            mode,
            start,
            end: self.config.end_block(),
            retry_policy: self.config.retry_policy(),
            gap_fill_policy: self.config.gap_fill_policy(),
            notification_buffer: self.config.notification_buffer(),
        }));

        let producer_result: Result<Cursor> = match producer_handle.await {
            Ok(result) => result,
            Err(err) => Err(fatal_handler.trigger(
                "block producer",
                anyhow!("block producer task failed: {err}"),
            )),
        };
        tracing::debug!("block producer joined");

        let drain_summary = match drain_handle.await {
            Ok(summary) => summary,
            Err(err) => {
                fatal_handler.trigger(
                    "persistence drain",
                    anyhow!("persistence drain task failed: {err}"),
                );
                DrainSummary::default()
            }
        };
        tracing::debug!("persistence drain joined");

        run_token.cancel();
        if let Err(err) = metrics_handle.await {
            tracing::warn!(error = %err, "metrics reporter task panicked");
        }

        let current = self.telemetry.snapshot();
        let queued = current.queued_blocks.saturating_sub(baseline.queued_blocks);
        let report = PipelineReport {
            first_queued: (queued > 0).then_some(start),
            last_queued: if queued > 0 { current.last_queued } else { None },
            queued,
            persisted: drain_summary.persisted,
            sink_failures: drain_summary.failed,
            cancelled: false,
        };

        if let Some(err) = fatal_handler.error() {
            return Err(err).context("block processing pipeline aborted");
        }

        match producer_result {
            Ok(cursor) => {
                tracing::info!(
                    last_processed = ?cursor.last_processed(),
                    persisted = report.persisted,
                    sink_failures = report.sink_failures,
                    "block pipeline finished"
                );
                Ok(report)
            }
            Err(err) if is_cancellation(&err) => {
                tracing::info!(
                    last_queued = ?report.last_queued,
                    persisted = report.persisted,
                    "block pipeline cancelled"
                );
                Ok(PipelineReport {
                    cancelled: true,
                    ..report
                })
            }
            Err(err) => Err(err).context("block processing pipeline aborted"),
        }
    }

    /// Runs the readiness check, or resolves the start from the head for live runs.
    async fn resolve_start(
        &self,
        mode: RunMode,
        cancellation: &CancellationToken,
    ) -> Result<u64> {
        if mode.is_live() {
            let head = tokio::select! {
                _ = cancellation.cancelled() => return Err(PipelineError::Cancelled.into()),
                head = self.source.head_number() => head.map_err(PipelineError::HeadUnavailable)?,
            };
            tracing::info!(head, "live mode: starting from the current head");
            return Ok(head);
        }

        let start = self
            .config
            .start_block()
            .ok_or_else(|| anyhow!("start_block is required unless live mode is enabled"))?;

        ReadinessGate::new(
            self.config.allow_future_start(),
            self.config.readiness_poll_interval(),
        )
        .wait_for_start(self.source.as_ref(), start, cancellation)
        .await?;

        Ok(start)
    }
}

/// Producer task body: backfill, then optionally follow new heads.
async fn produce<S>(params: ProducerParams<S>) -> Result<Cursor>
where
    S: BlockSource + ?Sized,
{
    let ProducerParams {
        source,
        handoff,
        telemetry,
        run_token,
        fatal_handler,
        mode,
        start,
        end,
        retry_policy,
        gap_fill_policy,
        notification_buffer,
    } = params;

    let fetcher = RetryingFetcher::new(source.as_ref(), retry_policy, &telemetry, &run_token);
    let backfill = BackfillStage::new(&fetcher, &handoff, &telemetry);
    let cursor = Cursor::before(start);

    let result = if mode.uses_subscription() {
        match backfill.run_to_head(cursor, end).await {
            Ok(cursor) if end.is_some_and(|end| cursor.reached(end)) => {
                tracing::info!("end block reached during backfill; skipping live subscription");
                Ok(cursor)
            }
            Ok(cursor) => {
                CatchUpReconciler::new(
                    &fetcher,
                    &handoff,
                    &telemetry,
                    gap_fill_policy,
                    notification_buffer,
                )
                .run(cursor, end)
                .await
            }
            Err(err) => Err(err),
        }
    } else {
        backfill.run(cursor, end).await
    };

    handoff.close();

    match result {
        Ok(cursor) => {
            tracing::debug!(last_processed = ?cursor.last_processed(), "block producer finished");
            Ok(cursor)
        }
        Err(PipelineError::Cancelled) => {
            tracing::debug!("block producer cancelled");
            Err(PipelineError::Cancelled.into())
        }
        Err(err) => Err(fatal_handler.trigger("block producer", err.into())),
    }
}

fn is_cancellation(err: &anyhow::Error) -> bool {
    pipeline_error(err).is_some_and(PipelineError::is_cancelled)
}
