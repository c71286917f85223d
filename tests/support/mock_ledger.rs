use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Error as AnyError, Result};
use blockpipe::{
    BlockHash, BlockHeaderNotice, BlockRecord, BlockRecordParts, BlockSource, SourceFuture,
    SubscriptionHandle,
};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

/// Deterministic hash derived from a block number.
pub fn block_hash(number: u64) -> BlockHash {
    let mut bytes = [0x5cu8; 32];
    bytes[..8].copy_from_slice(&number.to_be_bytes());
    BlockHash::new(bytes)
}

pub fn block(number: u64) -> BlockRecord {
    BlockRecord::new(BlockRecordParts {
        number,
        hash: block_hash(number),
        parent_hash: number.checked_sub(1).map(block_hash).unwrap_or_default(),
        timestamp: 1_600_000_000 + number * 13,
        tx_count: (number % 5) as usize,
        miner: format!("0x{:040x}", number % 3),
        gas_used: 42_000 * (number % 5),
        gas_limit: 15_000_000,
        size: 1_024 + number,
        extra_data: vec![0xd8, (number & 0xff) as u8],
        nonce: number * 31,
        difficulty: 2 + u128::from(number),
        receipts_root: block_hash(number ^ 0xffff),
    })
}

struct Feed {
    notices: mpsc::Sender<BlockHeaderNotice>,
    errors: mpsc::Sender<AnyError>,
    stop: CancellationToken,
}

#[derive(Default)]
struct LedgerState {
    by_hash: HashMap<BlockHash, u64>,
    head: Option<u64>,
    flaky_numbers: HashMap<u64, usize>,
    number_lookups: Vec<u64>,
    hash_lookups: Vec<u64>,
    feed: Option<Feed>,
}

/// In-memory ledger implementing [`BlockSource`] through the public API.
///
/// Blocks exist from genesis up to the mined head; `mine` extends the chain
/// and, with an active subscription, announces only the new tip so callers
/// can produce notification gaps on purpose.
#[derive(Clone, Default)]
pub struct MockLedger {
    state: Arc<Mutex<LedgerState>>,
    subscribed: Arc<Notify>,
}

impl MockLedger {
    pub fn with_blocks(head: u64) -> Self {
        let ledger = Self::default();
        ledger.extend_to(head);
        ledger
    }

    pub fn head(&self) -> Option<u64> {
        self.state.lock().unwrap().head
    }

    fn extend_to(&self, head: u64) {
        let mut state = self.state.lock().unwrap();
        let from = state.head.map_or(0, |head| head + 1);
        for number in from..=head {
            state.by_hash.insert(block_hash(number), number);
        }
        state.head = Some(state.head.map_or(head, |current| current.max(head)));
    }

    /// Extends the chain up to `head` and announces only the new tip.
    pub async fn mine(&self, head: u64) {
        self.extend_to(head);
        let notices = self
            .state
            .lock()
            .unwrap()
            .feed
            .as_ref()
            .map(|feed| feed.notices.clone());
        if let Some(notices) = notices {
            let _ = notices
                .send(BlockHeaderNotice::new(block_hash(head), head))
                .await;
        }
    }

    /// Makes the next `times` lookups of block `number` fail.
    pub fn flaky(&self, number: u64, times: usize) {
        self.state
            .lock()
            .unwrap()
            .flaky_numbers
            .insert(number, times);
    }

    pub fn number_lookups(&self) -> Vec<u64> {
        self.state.lock().unwrap().number_lookups.clone()
    }

    pub fn hash_lookups(&self) -> Vec<u64> {
        self.state.lock().unwrap().hash_lookups.clone()
    }

    pub async fn wait_for_subscription(&self) {
        loop {
            let notified = self.subscribed.notified();
            if self.state.lock().unwrap().feed.is_some() {
                return;
            }
            notified.await;
        }
    }

    pub fn subscription_stopped(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .feed
            .as_ref()
            .map_or(true, |feed| feed.stop.is_cancelled())
    }

    /// Reports a transport failure on the active subscription.
    pub async fn fail_subscription(&self, message: &str) -> Result<()> {
        let errors = self
            .state
            .lock()
            .unwrap()
            .feed
            .as_ref()
            .map(|feed| feed.errors.clone())
            .ok_or_else(|| anyhow!("no active subscription"))?;
        errors
            .send(anyhow!(message.to_string()))
            .await
            .map_err(|_| anyhow!("subscription error receiver dropped"))
    }

    fn fetch(&self, number: u64) -> Result<BlockRecord> {
        let mut state = self.state.lock().unwrap();
        if let Some(remaining) = state.flaky_numbers.get_mut(&number) {
            if *remaining > 0 {
                *remaining -= 1;
                bail!("connection reset while fetching block {number}");
            }
        }
        match state.head {
            Some(head) if number <= head => Ok(block(number)),
            _ => bail!("block {number} not found"),
        }
    }
}

impl BlockSource for MockLedger {
    fn block_by_number(&self, number: u64) -> SourceFuture<'_, BlockRecord> {
        Box::pin(async move {
            self.state.lock().unwrap().number_lookups.push(number);
            self.fetch(number)
        })
    }

    fn block_by_hash<'a>(&'a self, hash: &'a BlockHash) -> SourceFuture<'a, BlockRecord> {
        Box::pin(async move {
            let number = {
                let mut state = self.state.lock().unwrap();
                let number = *state
                    .by_hash
                    .get(hash)
                    .ok_or_else(|| anyhow!("block {hash} not found"))?;
                state.hash_lookups.push(number);
                number
            };
            self.fetch(number)
        })
    }

    fn head_number(&self) -> SourceFuture<'_, u64> {
        Box::pin(async move {
            self.head()
                .ok_or_else(|| anyhow!("ledger has no blocks yet"))
        })
    }

    fn subscribe_new_heads(
        &self,
        notices: mpsc::Sender<BlockHeaderNotice>,
    ) -> SourceFuture<'_, SubscriptionHandle> {
        Box::pin(async move {
            let (errors, error_rx) = mpsc::channel(1);
            let stop = CancellationToken::new();
            self.state.lock().unwrap().feed = Some(Feed {
                notices,
                errors,
                stop: stop.clone(),
            });
            self.subscribed.notify_waiters();
            Ok(SubscriptionHandle::new(error_rx, stop))
        })
    }
}
