use anyhow::Error as AnyError;
use std::fmt;

/// Sequencing failures that are allowed to terminate a pipeline run.
///
/// Transient fetch failures and sink write failures never surface here: the
/// fetcher retries the former and the drain logs and skips the latter.
#[derive(Debug)]
pub enum PipelineError {
    /// The requested start block is ahead of the source head and future starts are disabled.
    StartInFuture { start: u64, head: u64 },
    /// The source could not report its current head.
    HeadUnavailable(AnyError),
    /// The live subscription failed or was closed by the remote end.
    SubscriptionTransport(AnyError),
    /// The source's connection is gone for good; retrying lookups cannot succeed.
    SourceDisconnected(AnyError),
    /// A block needed to fill a gap between notifications could not be fetched.
    GapFill { number: u64, source: AnyError },
    /// The persistence drain went away while the producer still had records to hand off.
    DrainStopped,
    /// The run was cancelled before it could finish.
    Cancelled,
}

impl PipelineError {
    /// Returns `true` for cooperative shutdowns as opposed to genuine failures.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::StartInFuture { start, head } => write!(
                f,
                "start block {start} is in the future (latest block: {head}) and future starts are not allowed"
            ),
            PipelineError::HeadUnavailable(err) => {
                write!(f, "failed to query the latest block number: {err}")
            }
            PipelineError::SubscriptionTransport(err) => {
                write!(f, "new-heads subscription failed: {err}")
            }
            PipelineError::SourceDisconnected(err) => {
                write!(f, "block source disconnected: {err}")
            }
            PipelineError::GapFill { number, source } => {
                write!(f, "failed to fetch missed block {number}: {source}")
            }
            PipelineError::DrainStopped => {
                write!(f, "persistence drain stopped before the producer finished")
            }
            PipelineError::Cancelled => write!(f, "pipeline run cancelled"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::HeadUnavailable(err)
            | PipelineError::SubscriptionTransport(err)
            | PipelineError::SourceDisconnected(err) => Some(err.as_ref()),
            PipelineError::GapFill { source, .. } => Some(source.as_ref()),
            PipelineError::StartInFuture { .. }
            | PipelineError::DrainStopped
            | PipelineError::Cancelled => None,
        }
    }
}

/// Finds the [`PipelineError`] at the root of an `anyhow` chain, if any.
pub fn pipeline_error(err: &AnyError) -> Option<&PipelineError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
}
