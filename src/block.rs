//! Block-level value types that flow through the pipeline: the immutable
//! [`BlockRecord`] snapshot, the [`BlockHeaderNotice`] delivered by live
//! subscriptions, and the [`BlockHash`] digest shared by both.

use anyhow::{bail, Context, Result};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 32-byte block digest rendered as `0x`-prefixed lower-case hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    pub const LEN: usize = 32;

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for BlockHash {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let bytes = hex::decode(digits).with_context(|| format!("invalid block hash {value:?}"))?;
        if bytes.len() != Self::LEN {
            bail!(
                "block hash must be {} bytes, got {} ({value:?})",
                Self::LEN,
                bytes.len()
            );
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&bytes);
        Ok(Self(digest))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({self})")
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Immutable snapshot of one ledger block as returned by a [`crate::BlockSource`].
///
/// Instances are built once by the source and handed through the pipeline by
/// value; no stage mutates a record after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    number: u64,
    hash: BlockHash,
    parent_hash: BlockHash,
    timestamp: u64,
    tx_count: usize,
    miner: String,
    gas_used: u64,
    gas_limit: u64,
    size: u64,
    #[serde(serialize_with = "serialize_hex_bytes")]
    extra_data: Vec<u8>,
    nonce: u64,
    difficulty: u128,
    receipts_root: BlockHash,
}

/// Field-by-field constructor input for [`BlockRecord`].
#[derive(Debug, Clone, Default)]
pub struct BlockRecordParts {
    pub number: u64,
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
    pub timestamp: u64,
    pub tx_count: usize,
    pub miner: String,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub size: u64,
    pub extra_data: Vec<u8>,
    pub nonce: u64,
    pub difficulty: u128,
    pub receipts_root: BlockHash,
}

impl BlockRecord {
    pub fn new(parts: BlockRecordParts) -> Self {
        let BlockRecordParts {
            number,
            hash,
            parent_hash,
            timestamp,
            tx_count,
            miner,
            gas_used,
            gas_limit,
            size,
            extra_data,
            nonce,
            difficulty,
            receipts_root,
        } = parts;

        Self {
            number,
            hash,
            parent_hash,
            timestamp,
            tx_count,
            miner,
            gas_used,
            gas_limit,
            size,
            extra_data,
            nonce,
            difficulty,
            receipts_root,
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn hash(&self) -> &BlockHash {
        &self.hash
    }

    pub fn parent_hash(&self) -> &BlockHash {
        &self.parent_hash
    }

    /// Block timestamp in seconds since the Unix epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn tx_count(&self) -> usize {
        self.tx_count
    }

    /// Address of the block producer (miner / fee recipient), EIP-55 checksummed
    /// when decoded from a node.
    pub fn miner(&self) -> &str {
        &self.miner
    }

    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    /// Encoded block size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn extra_data(&self) -> &[u8] {
        &self.extra_data
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn difficulty(&self) -> u128 {
        self.difficulty
    }

    pub fn receipts_root(&self) -> &BlockHash {
        &self.receipts_root
    }
}

fn serialize_hex_bytes<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&format_args!("0x{}", hex::encode(bytes)))
}

/// Lightweight `(hash, number)` pair pushed by a new-heads subscription.
///
/// Notices are never persisted; the reconciler resolves each one into a full
/// [`BlockRecord`] by hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeaderNotice {
    hash: BlockHash,
    number: u64,
}

impl BlockHeaderNotice {
    pub fn new(hash: BlockHash, number: u64) -> Self {
        Self { hash, number }
    }

    pub fn hash(&self) -> &BlockHash {
        &self.hash
    }

    pub fn number(&self) -> u64 {
        self.number
    }
}
