//! Ethereum JSON-RPC types
//!
//! Type definitions for blocks, receipts and logs returned from
//! Ethereum JSON-RPC endpoints. Only the fields the ingestion engine
//! needs are modelled.

use alloy_primitives::B256;
use serde::{Deserialize, Deserializer, Serialize};

/// Ethereum block, with either transaction hashes or full transactions.
#[derive(Debug, Clone, Deserialize)]
pub struct Block {
    /// Block number (hex string in JSON, parsed to u64)
    #[serde(rename = "number", deserialize_with = "deserialize_hex_u64")]
    pub number: u64,

    /// Block hash (hex string in JSON)
    #[serde(rename = "hash", deserialize_with = "deserialize_hex_b256")]
    pub hash: B256,

    /// Parent block hash (hex string in JSON)
    #[serde(rename = "parentHash", deserialize_with = "deserialize_hex_b256")]
    pub parent_hash: B256,

    /// Block timestamp (hex string in JSON, Unix epoch seconds)
    #[serde(rename = "timestamp", deserialize_with = "deserialize_hex_u64")]
    pub timestamp: u64,

    /// Transactions in the block
    #[serde(rename = "transactions", default)]
    pub transactions: Vec<BlockTransaction>,
}

impl Block {
    /// Hashes of all transactions in block order.
    pub fn transaction_hashes(&self) -> Vec<B256> {
        self.transactions.iter().map(BlockTransaction::hash).collect()
    }
}

/// A transaction entry in a block: a bare hash (`full_tx = false`)
/// or a full transaction object (`full_tx = true`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BlockTransaction {
    Hash(#[serde(deserialize_with = "deserialize_hex_b256")] B256),
    Full(FullTransaction),
}

impl BlockTransaction {
    pub fn hash(&self) -> B256 {
        match self {
            Self::Hash(hash) => *hash,
            Self::Full(tx) => tx.hash,
        }
    }
}

/// The subset of a full transaction object we use.
#[derive(Debug, Clone, Deserialize)]
pub struct FullTransaction {
    #[serde(rename = "hash", deserialize_with = "deserialize_hex_b256")]
    pub hash: B256,
}

/// Transaction receipt.
#[derive(Debug, Clone, Deserialize)]
pub struct Receipt {
    /// Transaction hash (hex string in JSON)
    #[serde(rename = "transactionHash", deserialize_with = "deserialize_hex_b256")]
    pub transaction_hash: B256,

    /// Transaction status: 1 = success, 0 = failure. Missing on pre-Byzantium receipts.
    #[serde(rename = "status", default, deserialize_with = "deserialize_hex_u64_opt")]
    pub status: Option<u64>,

    /// Logs emitted during transaction execution (empty for reverted txs)
    #[serde(rename = "logs", default)]
    pub logs: Vec<RawLog>,
}

/// A hex value that may arrive as text (`"0xab.."` or `"ab.."`) or as raw bytes.
///
/// JSON-RPC always yields text; raw bytes show up when logs are built
/// programmatically or replayed from another source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HexField {
    Text(String),
    Raw(Vec<u8>),
}

impl From<&str> for HexField {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for HexField {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for HexField {
    fn from(value: Vec<u8>) -> Self {
        Self::Raw(value)
    }
}

/// Log entry emitted by a contract during transaction execution.
///
/// Address and transaction hash are kept in their wire representation;
/// the decoder validates and normalizes them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLog {
    /// Address of the contract that emitted the log
    #[serde(rename = "address", default)]
    pub address: Option<HexField>,

    /// Indexed topics (topic0 = event signature, topics[1..] = indexed params)
    #[serde(rename = "topics", default)]
    pub topics: Vec<String>,

    /// Non-indexed event data (hex string)
    #[serde(rename = "data", default, deserialize_with = "deserialize_hex_bytes")]
    pub data: Vec<u8>,

    /// Transaction that emitted the log
    #[serde(rename = "transactionHash", default)]
    pub transaction_hash: Option<HexField>,

    /// Block the log belongs to (absent for pending logs)
    #[serde(rename = "blockNumber", default, deserialize_with = "deserialize_hex_u64_opt")]
    pub block_number: Option<u64>,

    /// Position of the log in the block
    #[serde(rename = "logIndex", default, deserialize_with = "deserialize_hex_u64_opt")]
    pub log_index: Option<u64>,

    /// Set by the node when the log was dropped by a reorg
    #[serde(rename = "removed", default)]
    pub removed: bool,
}

/// Filter for `eth_getLogs` range queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    /// Only logs emitted by these addresses (normalized, unprefixed). Empty = any.
    pub addresses: Vec<String>,
    /// Only logs whose first topic is one of these (unprefixed). Empty = any.
    pub topic0: Vec<String>,
}

impl LogFilter {
    /// Filter on a single event signature hash.
    pub fn topic(method_id: impl Into<String>) -> Self {
        Self {
            addresses: Vec::new(),
            topic0: vec![method_id.into()],
        }
    }

    /// JSON-RPC filter object for the given inclusive block range.
    pub fn to_json(&self, from_block: u64, to_block: u64) -> serde_json::Value {
        let mut filter = serde_json::json!({
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
        });
        if !self.addresses.is_empty() {
            let addresses: Vec<String> = self.addresses.iter().map(|a| format!("0x{}", a)).collect();
            filter["address"] = serde_json::json!(addresses);
        }
        if !self.topic0.is_empty() {
            let topics: Vec<String> = self.topic0.iter().map(|t| format!("0x{}", t)).collect();
            filter["topics"] = serde_json::json!([topics]);
        }
        filter
    }
}

// Hex deserialization helpers

/// Pad an odd-length hex string with a leading zero.
/// This handles cases where RPC returns hex strings without leading zeros.
fn pad_hex_string(s: &str) -> String {
    if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    }
}

/// Deserialize a hex string to u64.
fn deserialize_hex_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let s = s.strip_prefix("0x").unwrap_or(&s);
    u64::from_str_radix(s, 16).map_err(serde::de::Error::custom)
}

/// Deserialize an optional hex string to u64.
fn deserialize_hex_u64_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    match s {
        Some(s) => {
            let s = s.strip_prefix("0x").unwrap_or(&s);
            if s.is_empty() {
                return Ok(None);
            }
            u64::from_str_radix(s, 16)
                .map(Some)
                .map_err(serde::de::Error::custom)
        }
        None => Ok(None),
    }
}

/// Deserialize a hex string to B256.
fn deserialize_hex_b256<'de, D>(deserializer: D) -> Result<B256, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let s = s.strip_prefix("0x").unwrap_or(&s);
    let s = pad_hex_string(s);
    let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
    if bytes.len() != 32 {
        return Err(serde::de::Error::custom(format!(
            "Expected 32 bytes for hash, got {}",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(&bytes))
}

/// Deserialize a hex string to bytes.
fn deserialize_hex_bytes<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    let s = s.strip_prefix("0x").unwrap_or(&s);
    if s.is_empty() {
        Ok(Vec::new())
    } else {
        let s = pad_hex_string(s);
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
