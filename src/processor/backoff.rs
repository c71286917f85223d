use crate::runtime::error::PipelineError;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Delay schedule applied between attempts of a failed lookup.
///
/// Attempts are never capped: the policy only decides how long to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    initial_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Waits the same `delay` before every retry.
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
        }
    }

    /// Doubles the delay after every failure, starting at `initial` and capped at `max`.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max.max(initial),
        }
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay to use after `current` elapsed without success.
    pub fn next_delay(&self, current: Duration) -> Duration {
        if current.is_zero() {
            return self.max_delay.min(Duration::from_millis(1));
        }

        current.saturating_mul(2).min(self.max_delay)
    }
}

/// Sleeps for `delay` unless `cancellation` fires first.
///
/// A zero delay still yields to the scheduler so tight retry loops cannot
/// starve the drain task.
pub(crate) async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: &CancellationToken,
) -> Result<(), PipelineError> {
    if cancellation.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    tokio::select! {
        _ = cancellation.cancelled() => Err(PipelineError::Cancelled),
        _ = sleep(delay) => Ok(()),
    }
}
