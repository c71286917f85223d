use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

const NOTHING_QUEUED: u64 = u64::MAX;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters shared by the producer, the drain, and the metrics reporter.
#[derive(Debug)]
pub struct Telemetry {
    queued_blocks: AtomicU64,
    persisted_blocks: AtomicU64,
    gap_filled_blocks: AtomicU64,
    fetch_retries: AtomicU64,
    sink_failures: AtomicU64,
    last_queued: AtomicU64,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            queued_blocks: AtomicU64::new(0),
            persisted_blocks: AtomicU64::new(0),
            gap_filled_blocks: AtomicU64::new(0),
            fetch_retries: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            last_queued: AtomicU64::new(NOTHING_QUEUED),
        }
    }
}

impl Telemetry {
    pub fn record_queued(&self, number: u64) {
        self.queued_blocks.fetch_add(1, Ordering::Relaxed);
        self.last_queued.store(number, Ordering::Relaxed);
    }

    pub fn record_gap_filled(&self) {
        self.gap_filled_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persisted(&self) {
        self.persisted_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_retry(&self) {
        self.fetch_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let last_queued = match self.last_queued.load(Ordering::Relaxed) {
            NOTHING_QUEUED => None,
            value => Some(value),
        };

        TelemetrySnapshot {
            queued_blocks: self.queued_blocks.load(Ordering::Relaxed),
            persisted_blocks: self.persisted_blocks.load(Ordering::Relaxed),
            gap_filled_blocks: self.gap_filled_blocks.load(Ordering::Relaxed),
            fetch_retries: self.fetch_retries.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            last_queued,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub queued_blocks: u64,
    pub persisted_blocks: u64,
    pub gap_filled_blocks: u64,
    pub fetch_retries: u64,
    pub sink_failures: u64,
    pub last_queued: Option<u64>,
}

impl TelemetrySnapshot {
    /// Records queued by the producer that the drain has not finished with yet.
    pub fn in_flight(&self) -> u64 {
        self.queued_blocks
            .saturating_sub(self.persisted_blocks)
            .saturating_sub(self.sink_failures)
    }
}

/// Spawns a background task that periodically logs throughput, in-flight records, and error counts.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: "blockpipe::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let persisted_delta = current
                        .persisted_blocks
                        .saturating_sub(last_snapshot.persisted_blocks);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        persisted_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "blockpipe::metrics",
                        throughput = format!("{throughput:.2}"),
                        queued = current.queued_blocks,
                        persisted = current.persisted_blocks,
                        in_flight = current.in_flight(),
                        last_queued = ?current.last_queued,
                        gap_filled = current.gap_filled_blocks,
                        fetch_retries = current.fetch_retries,
                        sink_failures = current.sink_failures,
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
