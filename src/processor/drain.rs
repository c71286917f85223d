use crate::block::BlockRecord;
use crate::handoff::HandoffReceiver;
use crate::runtime::telemetry::Telemetry;
use crate::sink::BlockSink;
use std::sync::Arc;

/// Totals reported by the drain once the handoff channel is exhausted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    pub persisted: u64,
    pub failed: u64,
}

/// Consumer half of the pipeline: forwards every queued record to the sink.
pub struct PersistenceDrain<K: ?Sized> {
    sink: Arc<K>,
    telemetry: Arc<Telemetry>,
}

impl<K> PersistenceDrain<K>
where
    K: BlockSink + ?Sized,
{
    pub fn new(sink: Arc<K>, telemetry: Arc<Telemetry>) -> Self {
        Self { sink, telemetry }
    }

    /// Runs until the producer closes the channel and every queued record has
    /// been offered to the sink. Sink failures are logged and skipped.
    pub async fn run(self, mut records: HandoffReceiver<BlockRecord>) -> DrainSummary {
        let mut summary = DrainSummary::default();

        while let Some(record) = records.recv().await {
            let number = record.number();
            match self.sink.save(&record).await {
                Ok(()) => {
                    summary.persisted += 1;
                    self.telemetry.record_persisted();
                    tracing::debug!(number, "block persisted");
                }
                Err(err) => {
                    summary.failed += 1;
                    self.telemetry.record_sink_failure();
                    tracing::error!(
                        number,
                        error = %format!("{err:#}"),
                        "failed to persist block; continuing with the next one"
                    );
                }
            }
        }

        tracing::debug!(
            persisted = summary.persisted,
            failed = summary.failed,
            "handoff channel closed; drain finished"
        );
        summary
    }
}
