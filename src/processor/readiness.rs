//! Start-point gate run before any block is fetched.

use super::backoff::sleep_with_cancellation;
use crate::runtime::error::PipelineError;
use crate::source::BlockSource;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Holds the pipeline back until the requested start block exists on the source.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessGate {
    allow_future_start: bool,
    poll_interval: Duration,
}

impl ReadinessGate {
    pub fn new(allow_future_start: bool, poll_interval: Duration) -> Self {
        Self {
            allow_future_start,
            poll_interval,
        }
    }

    /// Returns the head observed once `start <= head`.
    ///
    /// A start ahead of the head fails with [`PipelineError::StartInFuture`]
    /// unless future starts are allowed, in which case the head is re-polled
    /// every `poll_interval`. Head query failures are not retried.
    pub async fn wait_for_start<S>(
        &self,
        source: &S,
        start: u64,
        cancellation: &CancellationToken,
    ) -> Result<u64, PipelineError>
    where
        S: BlockSource + ?Sized,
    {
        let mut announced_wait = false;

        loop {
            let head = tokio::select! {
                _ = cancellation.cancelled() => return Err(PipelineError::Cancelled),
                head = source.head_number() => head.map_err(PipelineError::HeadUnavailable)?,
            };

            if start <= head {
                if announced_wait {
                    tracing::info!(start, head, "start block is now available");
                }
                return Ok(head);
            }

            if !self.allow_future_start {
                return Err(PipelineError::StartInFuture { start, head });
            }

            if !announced_wait {
                tracing::info!(
                    start,
                    head,
                    poll_secs = self.poll_interval.as_secs_f64(),
                    "start block is in the future; waiting for the chain to catch up"
                );
                announced_wait = true;
            } else {
                tracing::debug!(start, head, "start block still ahead of head");
            }

            sleep_with_cancellation(self.poll_interval, cancellation).await?;
        }
    }
}
