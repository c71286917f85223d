//! Sequential historical replay.

use super::fetcher::{Lookup, RetryingFetcher};
use crate::block::BlockRecord;
use crate::handoff::HandoffSender;
use crate::runtime::cursor::Cursor;
use crate::runtime::error::PipelineError;
use crate::runtime::telemetry::Telemetry;
use crate::source::BlockSource;
use tokio_util::sync::CancellationToken;

/// Pushes `record` to the drain, waiting for room in the handoff channel.
pub(crate) async fn hand_off(
    handoff: &HandoffSender<BlockRecord>,
    record: BlockRecord,
    telemetry: &Telemetry,
    cancellation: &CancellationToken,
) -> Result<(), PipelineError> {
    let number = record.number();
    let ticket = tokio::select! {
        _ = cancellation.cancelled() => return Err(PipelineError::Cancelled),
        queued = handoff.enqueue(record) => queued.map_err(|_| PipelineError::DrainStopped)?,
    };
    // The drain owns the record from here on, delivered or not.
    telemetry.record_queued(number);
    tokio::select! {
        _ = cancellation.cancelled() => Err(PipelineError::Cancelled),
        _ = handoff.delivered(ticket) => Ok(()),
    }
}

/// Walks block numbers from `cursor + 1` upwards, one fetch at a time.
pub struct BackfillStage<'a, S: ?Sized> {
    fetcher: &'a RetryingFetcher<'a, S>,
    handoff: &'a HandoffSender<BlockRecord>,
    telemetry: &'a Telemetry,
}

impl<'a, S> BackfillStage<'a, S>
where
    S: BlockSource + ?Sized,
{
    pub fn new(
        fetcher: &'a RetryingFetcher<'a, S>,
        handoff: &'a HandoffSender<BlockRecord>,
        telemetry: &'a Telemetry,
    ) -> Self {
        Self {
            fetcher,
            handoff,
            telemetry,
        }
    }

    /// Replays every block after the cursor up to and including `end`
    /// (forever when `end` is `None`) and returns the advanced cursor.
    pub async fn run(&self, mut cursor: Cursor, end: Option<u64>) -> Result<Cursor, PipelineError> {
        while end.map_or(true, |end| !cursor.reached(end)) {
            let number = cursor.next();
            let record = self.fetcher.fetch(Lookup::Number(number)).await?;
            hand_off(
                self.handoff,
                record,
                self.telemetry,
                self.fetcher.cancellation(),
            )
            .await?;
            cursor.advance(number);
            tracing::info!(number, "block queued for persistence");
        }

        Ok(cursor)
    }

    /// Replays up to the source head, re-reading the head after each pass
    /// until the cursor has caught up with it. `end` caps the replay.
    ///
    /// Used before handing over to a live subscription so the gap between the
    /// historical range and the first notification stays small.
    pub async fn run_to_head(
        &self,
        mut cursor: Cursor,
        end: Option<u64>,
    ) -> Result<Cursor, PipelineError> {
        let cancellation = self.fetcher.cancellation();

        loop {
            let head = tokio::select! {
                _ = cancellation.cancelled() => return Err(PipelineError::Cancelled),
                head = self.fetcher.source().head_number() => {
                    head.map_err(PipelineError::HeadUnavailable)?
                }
            };

            let target = end.map_or(head, |end| end.min(head));
            if cursor.reached(target) {
                tracing::debug!(
                    head,
                    last_processed = ?cursor.last_processed(),
                    "backfill caught up with the source head"
                );
                return Ok(cursor);
            }

            tracing::info!(
                from = cursor.next(),
                to = target,
                "backfilling towards source head"
            );
            cursor = self.run(cursor, Some(target)).await?;
        }
    }
}
