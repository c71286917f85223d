use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use blockpipe::{BlockRecord, BlockSink, SinkFuture};
use once_cell::sync::Lazy;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Sink that keeps every record it was handed, optionally rejecting some.
#[derive(Default)]
pub struct RecordingSink {
    saved: Mutex<Vec<BlockRecord>>,
    rejected: Mutex<Vec<u64>>,
    reject: HashSet<u64>,
}

pub type SharedRecordingSink = Arc<RecordingSink>;

impl RecordingSink {
    pub fn shared() -> SharedRecordingSink {
        Arc::new(Self::default())
    }

    /// Sink whose `save` fails for every block number in `numbers`.
    pub fn rejecting(numbers: impl IntoIterator<Item = u64>) -> SharedRecordingSink {
        Arc::new(Self {
            reject: numbers.into_iter().collect(),
            ..Self::default()
        })
    }

    pub fn numbers(&self) -> Vec<u64> {
        self.saved
            .lock()
            .unwrap()
            .iter()
            .map(BlockRecord::number)
            .collect()
    }

    pub fn records(&self) -> Vec<BlockRecord> {
        self.saved.lock().unwrap().clone()
    }

    pub fn rejected(&self) -> Vec<u64> {
        self.rejected.lock().unwrap().clone()
    }
}

impl BlockSink for RecordingSink {
    fn save<'a>(&'a self, record: &'a BlockRecord) -> SinkFuture<'a> {
        Box::pin(async move {
            if self.reject.contains(&record.number()) {
                self.rejected.lock().unwrap().push(record.number());
                bail!("write failed for block {}", record.number());
            }
            self.saved.lock().unwrap().push(record.clone());
            Ok(())
        })
    }
}

pub async fn wait_for_saved(sink: &RecordingSink, count: usize, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let saved = sink.numbers().len();
        if saved >= count {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("timed out waiting for {count} saved blocks; have {saved}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

pub fn assert_is_contiguous(numbers: &[u64]) {
    for window in numbers.windows(2) {
        assert_eq!(
            window[1],
            window[0] + 1,
            "blocks are not contiguous: {numbers:?}"
        );
    }
}
