//! Block lookups with unbounded retries.
//!
//! `RetryingFetcher` resolves one block at a time. Any lookup failure is
//! logged, counted, and retried after the policy's delay until the block
//! arrives or the run is cancelled. A source whose connection is gone for good
//! ends the fetch with [`PipelineError::SourceDisconnected`] instead.

use super::backoff::{sleep_with_cancellation, RetryPolicy};
use crate::block::{BlockHash, BlockRecord};
use crate::runtime::error::PipelineError;
use crate::runtime::telemetry::Telemetry;
use crate::source::{is_connection_lost, BlockSource};
use anyhow::{anyhow, Result};
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Key a block is looked up by.
#[derive(Debug, Clone, Copy)]
pub enum Lookup<'a> {
    Number(u64),
    /// Lookup by hash for a block whose number is already known from its header.
    Hash { hash: &'a BlockHash, number: u64 },
}

impl Lookup<'_> {
    pub fn number(&self) -> u64 {
        match self {
            Lookup::Number(number) => *number,
            Lookup::Hash { number, .. } => *number,
        }
    }
}

impl fmt::Display for Lookup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::Number(number) => write!(f, "block {number}"),
            Lookup::Hash { hash, number } => write!(f, "block {number} ({hash})"),
        }
    }
}

pub struct RetryingFetcher<'a, S: ?Sized> {
    source: &'a S,
    policy: RetryPolicy,
    telemetry: &'a Telemetry,
    cancellation: &'a CancellationToken,
}

impl<'a, S> RetryingFetcher<'a, S>
where
    S: BlockSource + ?Sized,
{
    pub fn new(
        source: &'a S,
        policy: RetryPolicy,
        telemetry: &'a Telemetry,
        cancellation: &'a CancellationToken,
    ) -> Self {
        Self {
            source,
            policy,
            telemetry,
            cancellation,
        }
    }

    pub fn source(&self) -> &'a S {
        self.source
    }

    pub fn cancellation(&self) -> &'a CancellationToken {
        self.cancellation
    }

    /// Fetches `lookup`, retrying until it succeeds.
    ///
    /// Fails only with [`PipelineError::Cancelled`] or
    /// [`PipelineError::SourceDisconnected`].
    pub async fn fetch(&self, lookup: Lookup<'_>) -> Result<BlockRecord, PipelineError> {
        let mut delay = self.policy.initial_delay();
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            let err = match self.attempt(lookup).await? {
                Ok(record) => {
                    if attempt > 1 {
                        tracing::info!(
                            number = lookup.number(),
                            attempts = attempt,
                            "block fetched after retries"
                        );
                    }
                    return Ok(record);
                }
                Err(err) => err,
            };

            self.telemetry.record_fetch_retry();
            tracing::warn!(
                number = lookup.number(),
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                error = %format!("{err:#}"),
                "failed to fetch {lookup}; retrying"
            );

            sleep_with_cancellation(delay, self.cancellation).await?;
            delay = self.policy.next_delay(delay);
        }
    }

    /// Single attempt at `lookup`; a failure surfaces as [`PipelineError::GapFill`].
    pub async fn fetch_once(&self, lookup: Lookup<'_>) -> Result<BlockRecord, PipelineError> {
        self.attempt(lookup)
            .await?
            .map_err(|source| PipelineError::GapFill {
                number: lookup.number(),
                source,
            })
    }

    /// Runs one lookup raced against cancellation. The outer result carries
    /// cancellation, the inner one the lookup outcome.
    async fn attempt(
        &self,
        lookup: Lookup<'_>,
    ) -> Result<Result<BlockRecord>, PipelineError> {
        let request = async {
            match lookup {
                Lookup::Number(number) => self.source.block_by_number(number).await,
                Lookup::Hash { hash, .. } => self.source.block_by_hash(hash).await,
            }
        };

        let outcome = tokio::select! {
            _ = self.cancellation.cancelled() => return Err(PipelineError::Cancelled),
            outcome = request => outcome,
        };

        let outcome = match outcome {
            Err(err) if is_connection_lost(&err) => {
                return Err(PipelineError::SourceDisconnected(err))
            }
            outcome => outcome,
        };

        Ok(outcome.and_then(|record| {
            if record.number() == lookup.number() {
                Ok(record)
            } else {
                Err(anyhow!(
                    "source returned block {} when asked for {lookup}",
                    record.number()
                ))
            }
        }))
    }
}
