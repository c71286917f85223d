//! Utility helpers for decoding the hex-encoded quantities and byte strings
//! returned by Ethereum JSON-RPC calls.

use crate::block::BlockHash;
use anyhow::{bail, Context, Result};
use sha3::{Digest, Keccak256};
use std::str::FromStr;

fn strip_hex_prefix(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

/// Decodes a `0x`-prefixed hex quantity (e.g. `"0x1b4"`) into a `u64`.
pub fn quantity_to_u64(value: &str) -> Result<u64> {
    let digits = strip_hex_prefix(value);
    if digits.is_empty() {
        bail!("empty hex quantity {value:?}");
    }
    u64::from_str_radix(digits, 16).with_context(|| format!("invalid hex quantity {value:?}"))
}

/// Decodes a hex quantity into a `u128`; used for difficulty values.
pub fn quantity_to_u128(value: &str) -> Result<u128> {
    let digits = strip_hex_prefix(value);
    if digits.is_empty() {
        bail!("empty hex quantity {value:?}");
    }
    u128::from_str_radix(digits, 16).with_context(|| format!("invalid hex quantity {value:?}"))
}

/// Encodes a block number the way `eth_getBlockByNumber` expects it.
pub fn u64_to_quantity(value: u64) -> String {
    format!("0x{value:x}")
}

/// Decodes arbitrary hex data (`"0x"` decodes to an empty vector).
pub fn hex_to_bytes(value: &str) -> Result<Vec<u8>> {
    let digits = strip_hex_prefix(value);
    hex::decode(digits).with_context(|| format!("invalid hex data {value:?}"))
}

/// Parses a 32-byte hash field.
pub fn hex_to_hash(value: &str) -> Result<BlockHash> {
    BlockHash::from_str(value)
}

/// Renders a 20-byte account address in its EIP-55 mixed-case form.
pub fn checksum_address(value: &str) -> Result<String> {
    let digits = strip_hex_prefix(value);
    let bytes = hex::decode(digits).with_context(|| format!("invalid address {value:?}"))?;
    if bytes.len() != 20 {
        bail!("address {value:?} is {} bytes, expected 20", bytes.len());
    }

    let lower = hex::encode(bytes);
    let digest = Keccak256::new().chain_update(lower.as_bytes()).finalize();
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (digest[i / 2] >> if i % 2 == 0 { 4 } else { 0 }) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    Ok(out)
}
