use crate::processor::backoff::RetryPolicy;
use crate::runtime::telemetry;
use anyhow::{bail, Result};
use std::time::Duration;

pub const DEFAULT_RETRY_DELAY_SECS: u64 = 10;
pub const DEFAULT_READINESS_POLL_SECS: u64 = 5;
const DEFAULT_HANDOFF_CAPACITY: usize = 0;
const DEFAULT_NOTIFICATION_CAPACITY: usize = 0;

/// How the producer follows the chain once the historical backfill is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FollowMode {
    /// Sequential backfill only; the fetcher waits out missing blocks with its retry loop.
    #[default]
    Polling,
    /// Backfill, then hand over to the new-heads subscription.
    Subscription,
}

/// What to do when a block cannot be fetched while filling a gap between
/// subscription notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GapFillPolicy {
    /// Retry with the fetcher's unbounded retry loop, like the backfill stage.
    /// The notified block itself is tried once by hash and then fetched by
    /// number, so a header that was reorganized away cannot stall the follow.
    #[default]
    Retry,
    /// Treat the first failure, by number or by hash, as fatal and halt the run.
    Abort,
}

/// The four entry modes of the pipeline, fixed for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Start,
    StartWithSubscription,
    StartLive,
    StartLiveWithSubscription,
}

impl RunMode {
    pub fn is_live(self) -> bool {
        matches!(self, RunMode::StartLive | RunMode::StartLiveWithSubscription)
    }

    pub fn uses_subscription(self) -> bool {
        matches!(
            self,
            RunMode::StartWithSubscription | RunMode::StartLiveWithSubscription
        )
    }
}

/// Validated configuration of one pipeline run.
///
/// All instances must be constructed via [`PipelineConfig::builder`] or
/// [`PipelineConfig::new`] so invariants are checked before any task starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    start_block: Option<u64>,
    end_block: Option<u64>,
    live: bool,
    allow_future_start: bool,
    follow_mode: FollowMode,
    retry_delay: Duration,
    max_retry_delay: Option<Duration>,
    handoff_capacity: usize,
    notification_capacity: usize,
    readiness_poll_interval: Duration,
    gap_fill_policy: GapFillPolicy,
    metrics_interval: Duration,
}

pub struct PipelineConfigParams {
    pub start_block: Option<u64>,
    pub end_block: Option<u64>,
    pub live: bool,
    pub allow_future_start: bool,
    pub follow_mode: FollowMode,
    pub retry_delay: Duration,
    pub max_retry_delay: Option<Duration>,
    pub handoff_capacity: usize,
    pub notification_capacity: usize,
    pub readiness_poll_interval: Duration,
    pub gap_fill_policy: GapFillPolicy,
    pub metrics_interval: Duration,
}

impl PipelineConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values and validates it.
    pub fn new(params: PipelineConfigParams) -> Result<Self> {
        let PipelineConfigParams {
            start_block,
            end_block,
            live,
            allow_future_start,
            follow_mode,
            retry_delay,
            max_retry_delay,
            handoff_capacity,
            notification_capacity,
            readiness_poll_interval,
            gap_fill_policy,
            metrics_interval,
        } = params;

        let config = Self {
            start_block,
            end_block,
            live,
            allow_future_start,
            follow_mode,
            retry_delay,
            max_retry_delay,
            handoff_capacity,
            notification_capacity,
            readiness_poll_interval,
            gap_fill_policy,
            metrics_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// First block to fetch. `None` in live mode, where the start is resolved
    /// from the source head at launch.
    pub fn start_block(&self) -> Option<u64> {
        self.start_block
    }

    /// Last block to fetch (inclusive). `None` means unbounded.
    pub fn end_block(&self) -> Option<u64> {
        self.end_block
    }

    pub fn live(&self) -> bool {
        self.live
    }

    /// Whether the readiness gate may wait for the chain to reach the start block.
    /// Always `false` in live mode.
    pub fn allow_future_start(&self) -> bool {
        self.allow_future_start && !self.live
    }

    pub fn follow_mode(&self) -> FollowMode {
        self.follow_mode
    }

    /// Fixed delay between attempts of a failed block lookup.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Upper bound for the retry delay. When set, the delay doubles after
    /// every failed attempt of the same lookup, starting at [`Self::retry_delay`].
    pub fn max_retry_delay(&self) -> Option<Duration> {
        self.max_retry_delay
    }

    /// Retry policy derived from [`Self::retry_delay`] and [`Self::max_retry_delay`].
    pub fn retry_policy(&self) -> RetryPolicy {
        match self.max_retry_delay {
            Some(max) if max > self.retry_delay => RetryPolicy::exponential(self.retry_delay, max),
            _ => RetryPolicy::fixed(self.retry_delay),
        }
    }

    /// Number of records the producer may run ahead of the drain (zero means rendezvous).
    pub fn handoff_capacity(&self) -> usize {
        self.handoff_capacity
    }

    /// Requested buffer size for subscription notifications.
    pub fn notification_capacity(&self) -> usize {
        self.notification_capacity
    }

    /// Buffer size actually used for the notification channel; tokio channels
    /// need room for at least one message.
    pub fn notification_buffer(&self) -> usize {
        self.notification_capacity.max(1)
    }

    /// Interval between head polls while waiting for a future start block.
    pub fn readiness_poll_interval(&self) -> Duration {
        self.readiness_poll_interval
    }

    pub fn gap_fill_policy(&self) -> GapFillPolicy {
        self.gap_fill_policy
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn run_mode(&self) -> RunMode {
        match (self.live, self.follow_mode) {
            (false, FollowMode::Polling) => RunMode::Start,
            (false, FollowMode::Subscription) => RunMode::StartWithSubscription,
            (true, FollowMode::Polling) => RunMode::StartLive,
            (true, FollowMode::Subscription) => RunMode::StartLiveWithSubscription,
        }
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.live && (self.start_block.is_some() || self.allow_future_start) {
            bail!("when live mode is enabled, start_block and allow_future_start cannot be set");
        }

        if !self.live && self.start_block.is_none() {
            bail!("start_block is required unless live mode is enabled");
        }

        if let (Some(start), Some(end)) = (self.start_block, self.end_block) {
            if start > end {
                bail!("start_block must be <= end_block, got start_block = {start} and end_block = {end}");
            }
        }

        if let Some(max) = self.max_retry_delay {
            if max < self.retry_delay {
                bail!(
                    "max_retry_delay must be >= retry_delay, got max_retry_delay = {max:?} and retry_delay = {:?}",
                    self.retry_delay
                );
            }
        }

        if self.readiness_poll_interval.is_zero() {
            bail!("readiness_poll_interval must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct PipelineConfigBuilder {
    start_block: Option<u64>,
    end_block: Option<u64>,
    live: Option<bool>,
    allow_future_start: Option<bool>,
    follow_mode: Option<FollowMode>,
    retry_delay: Option<Duration>,
    max_retry_delay: Option<Duration>,
    handoff_capacity: Option<usize>,
    notification_capacity: Option<usize>,
    readiness_poll_interval: Option<Duration>,
    gap_fill_policy: Option<GapFillPolicy>,
    metrics_interval: Option<Duration>,
}

impl PipelineConfigBuilder {
    pub fn start_block(mut self, block: u64) -> Self {
        self.start_block = Some(block);
        self
    }

    pub fn end_block(mut self, block: u64) -> Self {
        self.end_block = Some(block);
        self
    }

    pub fn live(mut self, live: bool) -> Self {
        self.live = Some(live);
        self
    }

    pub fn allow_future_start(mut self, allow: bool) -> Self {
        self.allow_future_start = Some(allow);
        self
    }

    pub fn follow_mode(mut self, mode: FollowMode) -> Self {
        self.follow_mode = Some(mode);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = Some(delay);
        self
    }

    pub fn handoff_capacity(mut self, capacity: usize) -> Self {
        self.handoff_capacity = Some(capacity);
        self
    }

    pub fn notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = Some(capacity);
        self
    }

    pub fn readiness_poll_interval(mut self, interval: Duration) -> Self {
        self.readiness_poll_interval = Some(interval);
        self
    }

    pub fn gap_fill_policy(mut self, policy: GapFillPolicy) -> Self {
        self.gap_fill_policy = Some(policy);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<PipelineConfig> {
        let params = PipelineConfigParams {
            start_block: self.start_block,
            end_block: self.end_block,
            live: self.live.unwrap_or(false),
            allow_future_start: self.allow_future_start.unwrap_or(false),
            follow_mode: self.follow_mode.unwrap_or_default(),
            retry_delay: self
                .retry_delay
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RETRY_DELAY_SECS)),
            max_retry_delay: self.max_retry_delay,
            handoff_capacity: self.handoff_capacity.unwrap_or(DEFAULT_HANDOFF_CAPACITY),
            notification_capacity: self
                .notification_capacity
                .unwrap_or(DEFAULT_NOTIFICATION_CAPACITY),
            readiness_poll_interval: self
                .readiness_poll_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_READINESS_POLL_SECS)),
            gap_fill_policy: self.gap_fill_policy.unwrap_or_default(),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
        };

        PipelineConfig::new(params)
    }
}
