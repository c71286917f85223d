//! JSON-RPC block source for Ethereum-compatible nodes. HTTP endpoints serve
//! lookups only; WebSocket endpoints additionally stream `newHeads`
//! notifications through [`BlockSource::subscribe_new_heads`].

use crate::block::{BlockHash, BlockHeaderNotice, BlockRecord, BlockRecordParts};
use crate::source::endpoint::EndpointKind;
use crate::source::helpers::{
    checksum_address, hex_to_bytes, hex_to_hash, quantity_to_u128, quantity_to_u64,
    u64_to_quantity,
};
use crate::source::options::RpcClientOptions;
use crate::source::{BlockSource, SourceFuture, SubscriptionHandle};
use anyhow::{anyhow, Context, Error as AnyError, Result};
use futures::StreamExt;
use jsonrpsee::core::client::{ClientT, Error as JsonRpcError, Subscription, SubscriptionClientT};
use jsonrpsee::core::http_helpers::HttpError;
use jsonrpsee::core::traits::ToRpcParams;
use jsonrpsee::http_client::transport::Error as HttpTransportError;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const GET_BLOCK_BY_NUMBER: &str = "eth_getBlockByNumber";
const GET_BLOCK_BY_HASH: &str = "eth_getBlockByHash";
const BLOCK_NUMBER: &str = "eth_blockNumber";
const SUBSCRIBE: &str = "eth_subscribe";
const UNSUBSCRIBE: &str = "eth_unsubscribe";

#[derive(Debug)]
pub enum RpcError {
    Timeout { method: &'static str },
    BlockNumberNotFound { number: u64 },
    BlockHashNotFound { hash: BlockHash },
    ResponseTooLarge { method: &'static str },
    SubscriptionsUnsupported { kind: EndpointKind },
    /// The WebSocket connection died; the client never reconnects on its own.
    ConnectionClosed { method: &'static str, reason: String },
}

impl RpcError {
    /// Whether retrying the same call on this client can never succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RpcError::ConnectionClosed { .. })
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Timeout { method } => write!(f, "rpc method {method} timed out"),
            RpcError::BlockNumberNotFound { number } => {
                write!(f, "block {number} is not known to the node")
            }
            RpcError::BlockHashNotFound { hash } => {
                write!(f, "block {hash} is not known to the node")
            }
            RpcError::ResponseTooLarge { method } => {
                write!(f, "rpc {method} response exceeded HTTP size limits")
            }
            RpcError::SubscriptionsUnsupported { kind } => {
                write!(f, "{kind} endpoints do not support subscriptions")
            }
            RpcError::ConnectionClosed { method, reason } => {
                write!(f, "connection closed during rpc {method}: {reason}")
            }
        }
    }
}

impl std::error::Error for RpcError {}

#[derive(Debug, Clone)]
enum Transport {
    Http(HttpClient),
    Ws(Arc<WsClient>),
}

/// [`BlockSource`] backed by a jsonrpsee HTTP or WebSocket client.
#[derive(Debug, Clone)]
pub struct EthereumSource {
    endpoint: Arc<String>,
    kind: EndpointKind,
    transport: Transport,
    options: RpcClientOptions,
}

impl BlockSource for EthereumSource {
    fn block_by_number(&self, number: u64) -> SourceFuture<'_, BlockRecord> {
        Box::pin(self.get_block_by_number(number))
    }

    fn block_by_hash<'a>(&'a self, hash: &'a BlockHash) -> SourceFuture<'a, BlockRecord> {
        Box::pin(self.get_block_by_hash(hash))
    }

    fn head_number(&self) -> SourceFuture<'_, u64> {
        Box::pin(self.get_block_number())
    }

    fn subscribe_new_heads(
        &self,
        notices: mpsc::Sender<BlockHeaderNotice>,
    ) -> SourceFuture<'_, SubscriptionHandle> {
        Box::pin(self.subscribe(notices))
    }
}

impl EthereumSource {
    pub async fn connect(url: impl Into<String>, options: RpcClientOptions) -> Result<Self> {
        options.validate()?;

        let endpoint = url.into().trim().to_owned();
        let kind = EndpointKind::detect(&endpoint)?;

        let transport = if kind.supports_subscriptions() {
            let client = WsClientBuilder::default()
                .request_timeout(options.request_timeout)
                .max_concurrent_requests(options.max_concurrent_requests)
                .max_request_size(options.request_body_limit())
                .max_response_size(options.response_body_limit())
                .build(&endpoint)
                .await
                .map_err(|err| anyhow!("failed to connect to {endpoint}: {err}"))?;
            Transport::Ws(Arc::new(client))
        } else {
            let client = HttpClientBuilder::default()
                .request_timeout(options.request_timeout)
                .max_concurrent_requests(options.max_concurrent_requests)
                .max_request_size(options.request_body_limit())
                .max_response_size(options.response_body_limit())
                .build(&endpoint)
                .map_err(|err| anyhow!("failed to build RPC client: {err}"))?;
            Transport::Http(client)
        };

        tracing::info!(endpoint = %endpoint, transport = %kind, "connected to block source");

        Ok(Self {
            endpoint: Arc::new(endpoint),
            kind,
            transport,
            options,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub async fn get_block_by_number(&self, number: u64) -> Result<BlockRecord> {
        let raw: Option<RawBlock> = self
            .request(
                GET_BLOCK_BY_NUMBER,
                rpc_params![u64_to_quantity(number), false],
            )
            .await?;
        let raw = raw.ok_or(RpcError::BlockNumberNotFound { number })?;
        raw.into_record()
            .with_context(|| format!("failed to decode block {number}"))
    }

    pub async fn get_block_by_hash(&self, hash: &BlockHash) -> Result<BlockRecord> {
        let raw: Option<RawBlock> = self
            .request(GET_BLOCK_BY_HASH, rpc_params![hash.to_string(), false])
            .await?;
        let raw = raw.ok_or(RpcError::BlockHashNotFound { hash: *hash })?;
        raw.into_record()
            .with_context(|| format!("failed to decode block {hash}"))
    }

    pub async fn get_block_number(&self) -> Result<u64> {
        let raw: String = self.request(BLOCK_NUMBER, rpc_params![]).await?;
        let head = quantity_to_u64(&raw)?;
        tracing::debug!(head, "refreshed latest block number");
        Ok(head)
    }

    async fn request<R, P>(&self, method: &'static str, params: P) -> Result<R>
    where
        R: DeserializeOwned,
        P: ToRpcParams + Send,
    {
        let response = match &self.transport {
            Transport::Http(client) => {
                timeout(self.options.request_timeout, client.request(method, params)).await
            }
            Transport::Ws(client) => {
                timeout(self.options.request_timeout, client.request(method, params)).await
            }
        };

        response
            .map_err(|_| RpcError::Timeout { method })?
            .map_err(|err| map_rpc_error(method, err))
    }

    async fn subscribe(
        &self,
        notices: mpsc::Sender<BlockHeaderNotice>,
    ) -> Result<SubscriptionHandle> {
        let client = match &self.transport {
            Transport::Ws(client) => Arc::clone(client),
            Transport::Http(_) => {
                return Err(RpcError::SubscriptionsUnsupported { kind: self.kind }.into())
            }
        };

        let subscription: Subscription<RawHeader> = client
            .subscribe(SUBSCRIBE, rpc_params!["newHeads"], UNSUBSCRIBE)
            .await
            .map_err(|err| map_rpc_error(SUBSCRIBE, err))?;

        tracing::info!(endpoint = %self.endpoint, "subscribed to new block headers");

        let (error_tx, error_rx) = mpsc::channel(1);
        let stop = CancellationToken::new();
        let task = tokio::spawn(forward_new_heads(
            subscription,
            notices,
            error_tx,
            stop.clone(),
        ));

        Ok(SubscriptionHandle::new(error_rx, stop).with_task(task))
    }
}

enum FeedEvent {
    Stopped,
    Notification(Option<std::result::Result<RawHeader, serde_json::Error>>),
}

/// Pumps `newHeads` notifications into `notices` until stopped, the consumer
/// goes away, or the transport fails. A failure is reported once on `errors`.
async fn forward_new_heads(
    mut subscription: Subscription<RawHeader>,
    notices: mpsc::Sender<BlockHeaderNotice>,
    errors: mpsc::Sender<AnyError>,
    stop: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => FeedEvent::Stopped,
            item = subscription.next() => FeedEvent::Notification(item),
        };

        let failure = match event {
            FeedEvent::Stopped => break,
            FeedEvent::Notification(Some(Ok(raw))) => match raw.into_notice() {
                Ok(notice) => {
                    tracing::debug!(
                        number = notice.number(),
                        hash = %notice.hash(),
                        "received new block header"
                    );
                    let delivered = tokio::select! {
                        _ = stop.cancelled() => false,
                        sent = notices.send(notice) => sent.is_ok(),
                    };
                    if !delivered {
                        break;
                    }
                    continue;
                }
                Err(err) => err.context("malformed newHeads notification"),
            },
            FeedEvent::Notification(Some(Err(err))) => {
                anyhow!("failed to decode newHeads notification: {err}")
            }
            FeedEvent::Notification(None) => {
                anyhow!("newHeads subscription closed by the remote endpoint")
            }
        };

        tracing::warn!(error = %failure, "new-heads feed stopped");
        let _ = errors.send(failure).await;
        return;
    }

    if let Err(err) = subscription.unsubscribe().await {
        tracing::debug!(error = %err, "eth_unsubscribe failed");
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlock {
    number: String,
    hash: String,
    parent_hash: String,
    timestamp: String,
    #[serde(default)]
    transactions: Vec<IgnoredAny>,
    miner: String,
    gas_used: String,
    gas_limit: String,
    size: String,
    extra_data: String,
    #[serde(default)]
    nonce: Option<String>,
    #[serde(default)]
    difficulty: Option<String>,
    receipts_root: String,
}

impl RawBlock {
    fn into_record(self) -> Result<BlockRecord> {
        let nonce = match self.nonce.as_deref() {
            Some(nonce) => quantity_to_u64(nonce).context("nonce")?,
            None => 0,
        };
        let difficulty = match self.difficulty.as_deref() {
            Some(difficulty) => quantity_to_u128(difficulty).context("difficulty")?,
            None => 0,
        };

        Ok(BlockRecord::new(BlockRecordParts {
            number: quantity_to_u64(&self.number).context("number")?,
            hash: hex_to_hash(&self.hash).context("hash")?,
            parent_hash: hex_to_hash(&self.parent_hash).context("parentHash")?,
            timestamp: quantity_to_u64(&self.timestamp).context("timestamp")?,
            tx_count: self.transactions.len(),
            miner: checksum_address(&self.miner).context("miner")?,
            gas_used: quantity_to_u64(&self.gas_used).context("gasUsed")?,
            gas_limit: quantity_to_u64(&self.gas_limit).context("gasLimit")?,
            size: quantity_to_u64(&self.size).context("size")?,
            extra_data: hex_to_bytes(&self.extra_data).context("extraData")?,
            nonce,
            difficulty,
            receipts_root: hex_to_hash(&self.receipts_root).context("receiptsRoot")?,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    hash: String,
    number: String,
}

impl RawHeader {
    fn into_notice(self) -> Result<BlockHeaderNotice> {
        let hash = hex_to_hash(&self.hash)?;
        let number = quantity_to_u64(&self.number)?;
        Ok(BlockHeaderNotice::new(hash, number))
    }
}

fn map_rpc_error(label: &'static str, err: JsonRpcError) -> AnyError {
    if response_too_large(&err) {
        return RpcError::ResponseTooLarge { method: label }.into();
    }
    if matches!(err, JsonRpcError::RequestTimeout) {
        return RpcError::Timeout { method: label }.into();
    }
    if let JsonRpcError::RestartNeeded(reason) = &err {
        return RpcError::ConnectionClosed {
            method: label,
            reason: reason.to_string(),
        }
        .into();
    }
    anyhow!("rpc {label} call failed: {err}")
}

fn response_too_large(err: &JsonRpcError) -> bool {
    match err {
        JsonRpcError::Transport(inner) => match inner.downcast_ref::<HttpTransportError>() {
            Some(HttpTransportError::Http(http_err)) => matches!(http_err, HttpError::TooLarge),
            Some(HttpTransportError::RequestTooLarge) => true,
            _ => false,
        },
        _ => false,
    }
}
