//! Ledger data source abstraction consumed by the pipeline, plus the JSON-RPC
//! implementation used by the binary.
//!
//! The pipeline only ever talks to a [`BlockSource`]: fetch by number, fetch
//! by hash, query the head, and subscribe to new heads. Transport framing is
//! entirely the implementation's business.

pub mod endpoint;
pub mod ethereum;
pub mod helpers;
pub mod options;


pub use endpoint::EndpointKind;
pub use ethereum::{EthereumSource, RpcError};
pub use options::RpcClientOptions;

use crate::block::{BlockHash, BlockHeaderNotice, BlockRecord};
use anyhow::{Error as AnyError, Result};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub type SourceFuture<'a, T> = BoxFuture<'a, Result<T>>;

/// Whether `err` says the source's connection is gone for good, so retrying
/// the lookup on the same source is pointless.
pub fn is_connection_lost(err: &AnyError) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<RpcError>().is_some_and(RpcError::is_terminal))
}

/// Capability set the pipeline needs from a ledger node.
pub trait BlockSource: Send + Sync {
    /// Resolves a block by its number.
    fn block_by_number(&self, number: u64) -> SourceFuture<'_, BlockRecord>;

    /// Resolves a block by its hash.
    fn block_by_hash<'a>(&'a self, hash: &'a BlockHash) -> SourceFuture<'a, BlockRecord>;

    /// Returns the number of the latest block known to the source.
    fn head_number(&self) -> SourceFuture<'_, u64>;

    /// Starts delivering new-head notices into `notices`.
    ///
    /// Transport failures after the subscription was established are reported
    /// through [`SubscriptionHandle::next_error`].
    fn subscribe_new_heads(
        &self,
        notices: mpsc::Sender<BlockHeaderNotice>,
    ) -> SourceFuture<'_, SubscriptionHandle>;
}

impl<S: BlockSource + ?Sized> BlockSource for Arc<S> {
    fn block_by_number(&self, number: u64) -> SourceFuture<'_, BlockRecord> {
        (**self).block_by_number(number)
    }

    fn block_by_hash<'a>(&'a self, hash: &'a BlockHash) -> SourceFuture<'a, BlockRecord> {
        (**self).block_by_hash(hash)
    }

    fn head_number(&self) -> SourceFuture<'_, u64> {
        (**self).head_number()
    }

    fn subscribe_new_heads(
        &self,
        notices: mpsc::Sender<BlockHeaderNotice>,
    ) -> SourceFuture<'_, SubscriptionHandle> {
        (**self).subscribe_new_heads(notices)
    }
}

/// Live subscription handle: an asynchronous error channel plus the means to
/// stop the notification feed.
///
/// Dropping the handle stops the feed as well; [`SubscriptionHandle::unsubscribe`]
/// additionally waits for the forwarding task to finish.
#[derive(Debug)]
pub struct SubscriptionHandle {
    errors: mpsc::Receiver<AnyError>,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn new(errors: mpsc::Receiver<AnyError>, stop: CancellationToken) -> Self {
        Self {
            errors,
            stop,
            task: None,
        }
    }

    /// Attaches the task that forwards notifications so `unsubscribe` can join it.
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    /// Waits for the next transport error. Returns `None` once the error
    /// channel is closed, which happens when the feed stopped cleanly.
    pub async fn next_error(&mut self) -> Option<AnyError> {
        self.errors.recv().await
    }

    /// Stops the notification feed and waits for its forwarding task.
    pub async fn unsubscribe(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "subscription forwarding task panicked");
            }
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
