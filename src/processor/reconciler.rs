//! Live follow-up after the backfill in subscription mode.
//!
//! Every new-head notice is reconciled against the cursor: blocks the
//! subscription skipped are fetched by number first, then the notified block
//! itself is fetched by hash. The output stays gap-free and strictly
//! increasing regardless of how notifications are batched or dropped by the
//! node.

use super::backfill::hand_off;
use super::fetcher::{Lookup, RetryingFetcher};
use crate::block::{BlockHeaderNotice, BlockRecord};
use crate::handoff::HandoffSender;
use crate::runtime::config::GapFillPolicy;
use crate::runtime::cursor::Cursor;
use crate::runtime::error::PipelineError;
use crate::runtime::telemetry::Telemetry;
use crate::source::{BlockSource, SubscriptionHandle};
use anyhow::anyhow;
use std::future::Future;
use tokio::sync::mpsc;

pub struct CatchUpReconciler<'a, S: ?Sized> {
    fetcher: &'a RetryingFetcher<'a, S>,
    handoff: &'a HandoffSender<BlockRecord>,
    telemetry: &'a Telemetry,
    policy: GapFillPolicy,
    notification_buffer: usize,
}

impl<'a, S> CatchUpReconciler<'a, S>
where
    S: BlockSource + ?Sized,
{
    pub fn new(
        fetcher: &'a RetryingFetcher<'a, S>,
        handoff: &'a HandoffSender<BlockRecord>,
        telemetry: &'a Telemetry,
        policy: GapFillPolicy,
        notification_buffer: usize,
    ) -> Self {
        Self {
            fetcher,
            handoff,
            telemetry,
            policy,
            notification_buffer: notification_buffer.max(1),
        }
    }

    /// Subscribes to new heads and follows them until `end` is reached, the
    /// subscription fails, or the run is cancelled. The subscription is always
    /// released before returning.
    pub async fn run(&self, cursor: Cursor, end: Option<u64>) -> Result<Cursor, PipelineError> {
        if end.is_some_and(|end| cursor.reached(end)) {
            return Ok(cursor);
        }

        let cancellation = self.fetcher.cancellation();
        let (notice_tx, mut notices) = mpsc::channel(self.notification_buffer);
        let mut subscription = tokio::select! {
            _ = cancellation.cancelled() => return Err(PipelineError::Cancelled),
            handle = self.fetcher.source().subscribe_new_heads(notice_tx) => {
                handle.map_err(PipelineError::SubscriptionTransport)?
            }
        };
        tracing::info!(
            last_processed = ?cursor.last_processed(),
            "following new block headers"
        );

        let outcome = self
            .follow(&mut subscription, &mut notices, cursor, end)
            .await;
        subscription.unsubscribe().await;
        tracing::debug!("new-heads subscription released");
        outcome
    }

    async fn follow(
        &self,
        subscription: &mut SubscriptionHandle,
        notices: &mut mpsc::Receiver<BlockHeaderNotice>,
        mut cursor: Cursor,
        end: Option<u64>,
    ) -> Result<Cursor, PipelineError> {
        let cancellation = self.fetcher.cancellation();

        loop {
            if let Some(end) = end.filter(|end| cursor.reached(*end)) {
                tracing::info!(end, "reached end block; stopping live follow");
                return Ok(cursor);
            }

            let notice = tokio::select! {
                biased;
                _ = cancellation.cancelled() => return Err(PipelineError::Cancelled),
                err = subscription.next_error() => return Err(transport_failure(err)),
                notice = notices.recv() => match notice {
                    Some(notice) => notice,
                    None => {
                        return Err(PipelineError::SubscriptionTransport(anyhow!(
                            "new-heads notification stream closed"
                        )))
                    }
                },
            };

            cursor = self.reconcile(subscription, cursor, notice, end).await?;
        }
    }

    /// Brings the cursor up to `notice`, filling any gap before it.
    ///
    /// Every lookup is raced against the subscription's error channel, so a
    /// transport failure ends the run even while a fetch is being retried.
    pub async fn reconcile(
        &self,
        subscription: &mut SubscriptionHandle,
        mut cursor: Cursor,
        notice: BlockHeaderNotice,
        end: Option<u64>,
    ) -> Result<Cursor, PipelineError> {
        let notified = notice.number();
        if cursor.is_stale(notified) {
            tracing::warn!(
                number = notified,
                hash = %notice.hash(),
                last_processed = ?cursor.last_processed(),
                "ignoring notice at or below the last processed block"
            );
            return Ok(cursor);
        }

        if cursor.next() < notified {
            tracing::info!(
                from = cursor.next(),
                to = notified - 1,
                "filling blocks missed between notifications"
            );
        }

        while cursor.next() < notified {
            if end.is_some_and(|end| cursor.reached(end)) {
                return Ok(cursor);
            }
            let number = cursor.next();
            let record = self
                .watching(subscription, self.fetch(Lookup::Number(number)))
                .await?;
            self.queue(record).await?;
            cursor.advance(number);
            self.telemetry.record_gap_filled();
            tracing::info!(number, "missed block queued for persistence");
        }

        if end.is_some_and(|end| notified > end) {
            return Ok(cursor);
        }

        let record = self
            .watching(subscription, self.fetch_notified(&notice))
            .await?;
        self.queue(record).await?;
        cursor.advance(notified);
        tracing::info!(number = notified, "block queued for persistence");

        Ok(cursor)
    }

    /// Runs `lookup` unless the subscription reports a transport failure first.
    async fn watching(
        &self,
        subscription: &mut SubscriptionHandle,
        lookup: impl Future<Output = Result<BlockRecord, PipelineError>>,
    ) -> Result<BlockRecord, PipelineError> {
        tokio::select! {
            biased;
            err = subscription.next_error() => Err(transport_failure(err)),
            record = lookup => record,
        }
    }

    async fn fetch(&self, lookup: Lookup<'_>) -> Result<BlockRecord, PipelineError> {
        match self.policy {
            GapFillPolicy::Retry => self.fetcher.fetch(lookup).await,
            GapFillPolicy::Abort => self.fetcher.fetch_once(lookup).await,
        }
    }

    /// Looks the notified block up by hash, once. Under [`GapFillPolicy::Retry`]
    /// a miss falls back to the canonical block at that height, since a hash
    /// that was reorganized away would never resolve.
    async fn fetch_notified(&self, notice: &BlockHeaderNotice) -> Result<BlockRecord, PipelineError> {
        let number = notice.number();
        let by_hash = Lookup::Hash {
            hash: notice.hash(),
            number,
        };
        match (self.fetcher.fetch_once(by_hash).await, self.policy) {
            (Err(PipelineError::GapFill { source, .. }), GapFillPolicy::Retry) => {
                tracing::warn!(
                    number,
                    hash = %notice.hash(),
                    error = %format!("{source:#}"),
                    "notified block not available by hash; fetching block at that height"
                );
                self.fetcher.fetch(Lookup::Number(number)).await
            }
            (outcome, _) => outcome,
        }
    }

    async fn queue(&self, record: BlockRecord) -> Result<(), PipelineError> {
        hand_off(
            self.handoff,
            record,
            self.telemetry,
            self.fetcher.cancellation(),
        )
        .await
    }
}

fn transport_failure(err: Option<anyhow::Error>) -> PipelineError {
    PipelineError::SubscriptionTransport(
        err.unwrap_or_else(|| anyhow!("subscription error channel closed")),
    )
}
