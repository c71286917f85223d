use crate::processor::pipeline::{Pipeline, PipelineReport};
use crate::sink::BlockSink;
use crate::source::BlockSource;
use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Drives a [`Pipeline`] and handles OS signals for graceful shutdowns.
pub struct Runner<S: ?Sized, K: ?Sized> {
    pipeline: Pipeline<S, K>,
    shutdown: CancellationToken,
}

impl<S, K> Runner<S, K>
where
    S: BlockSource + ?Sized + 'static,
    K: BlockSink + ?Sized + 'static,
{
    pub fn new(pipeline: Pipeline<S, K>) -> Self {
        Self {
            pipeline,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn pipeline(&self) -> &Pipeline<S, K> {
        &self.pipeline
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs the pipeline to completion (or until the shutdown token is cancelled).
    pub async fn run(&mut self) -> Result<PipelineReport> {
        let result = self.pipeline.run(self.shutdown.clone()).await;
        self.reinitialize_shutdown_token();
        result
    }

    /// Runs until the pipeline finishes or a Ctrl-C (SIGINT) is received.
    ///
    /// Ctrl-C cancels the run; records already handed to the drain are still
    /// persisted before this returns.
    pub async fn run_until_ctrl_c(&mut self) -> Result<PipelineReport> {
        let shutdown = self.shutdown.clone();
        tracing::info!("runner started; press Ctrl-C to stop");

        let result = {
            let run = self.pipeline.run(shutdown.clone());
            tokio::pin!(run);

            tokio::select! {
                result = &mut run => result,
                signal = signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("Ctrl-C received; shutting down runner");
                            shutdown.cancel();
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to listen for Ctrl-C; running without a signal handler");
                        }
                    }
                    run.await
                }
            }
        };

        self.reinitialize_shutdown_token();
        result
    }

    fn reinitialize_shutdown_token(&mut self) {
        self.shutdown = CancellationToken::new();
    }
}
