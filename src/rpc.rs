//! JSON-RPC client for Ethereum nodes
//!
//! `ChainClient` is the narrow view of the node the ingestion engine needs.
//! `RpcClient` implements it over HTTP JSON-RPC with a short timeout for
//! interactive calls, a long one for `eth_getLogs` range scans, and bounded
//! parallelism for batched block and receipt fetches.

use crate::error::ChainError;
use crate::types::{Block, LogFilter, RawLog, Receipt};
use alloy_primitives::B256;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Node operations consumed by the ingestion engine.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current chain height.
    async fn get_current_block_number(&self) -> Result<u64, ChainError>;

    /// Block by number. Fails with `UnknownBlock` if the node has none.
    async fn get_block(&self, number: u64, full_transactions: bool) -> Result<Block, ChainError>;

    /// Several blocks by number (transaction hashes only).
    async fn get_blocks(&self, numbers: &[u64]) -> Result<BTreeMap<u64, Block>, ChainError> {
        let mut blocks = BTreeMap::new();
        for &number in numbers {
            blocks.insert(number, self.get_block(number, false).await?);
        }
        Ok(blocks)
    }

    /// Receipt by transaction hash. Fails with `UnknownTransaction` if the node returns null.
    async fn get_transaction_receipt(&self, tx_hash: B256) -> Result<Receipt, ChainError>;

    /// Receipts for several transactions, in the order given.
    async fn get_transaction_receipts(&self, tx_hashes: &[B256]) -> Result<Vec<Receipt>, ChainError> {
        let mut receipts = Vec::with_capacity(tx_hashes.len());
        for &tx_hash in tx_hashes {
            receipts.push(self.get_transaction_receipt(tx_hash).await?);
        }
        Ok(receipts)
    }

    /// Logs in the inclusive block range matching the filter.
    async fn get_logs_for_range(
        &self,
        from_block: u64,
        to_block: u64,
        filter: &LogFilter,
    ) -> Result<Vec<RawLog>, ChainError>;
}

/// JSON-RPC client for Ethereum nodes.
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
    request_timeout: Duration,
    log_query_timeout: Duration,
    concurrency: usize,
}

impl RpcClient {
    /// Create a new RPC client with default timeouts (10 s / 120 s) and 8 parallel requests.
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            request_timeout: Duration::from_secs(10),
            log_query_timeout: Duration::from_secs(120),
            concurrency: 8,
        }
    }

    /// Timeouts for interactive calls and for `eth_getLogs` range scans.
    pub fn with_timeouts(mut self, request_timeout: Duration, log_query_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self.log_query_timeout = log_query_timeout;
        self
    }

    /// Maximum number of in-flight requests for batched fetches.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Make a JSON-RPC call.
    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value, ChainError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        let response = self
            .client
            .post(&self.url)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::RemoteUnavailable(format!("{}: {}", method, e)))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ChainError::RemoteUnavailable(format!("{}: HTTP {}", method, status)));
        }

        let json: Value = response.json().await.map_err(|e| {
            if e.is_decode() {
                ChainError::InvalidResponse(format!("{}: {}", method, e))
            } else {
                ChainError::RemoteUnavailable(format!("{}: {}", method, e))
            }
        })?;

        extract_result(json)
    }
}

/// Pull `result` out of a JSON-RPC response, mapping `error` objects to `ChainError::Rpc`.
fn extract_result(mut json: Value) -> Result<Value, ChainError> {
    if let Some(error) = json.get("error") {
        return Err(ChainError::Rpc {
            code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }
    match json.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(ChainError::InvalidResponse(
            "RPC response missing 'result' field".to_string(),
        )),
    }
}

/// Parse a hex quantity (`"0x1b4"`).
fn parse_quantity(value: &Value) -> Result<u64, ChainError> {
    let s = value
        .as_str()
        .ok_or_else(|| ChainError::InvalidResponse(format!("expected hex quantity, got {}", value)))?;
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Err(ChainError::InvalidResponse("empty hex quantity".to_string()));
    }
    u64::from_str_radix(s, 16)
        .map_err(|e| ChainError::InvalidResponse(format!("bad hex quantity '{}': {}", s, e)))
}

#[async_trait]
impl ChainClient for RpcClient {
    async fn get_current_block_number(&self) -> Result<u64, ChainError> {
        let result = self
            .call("eth_blockNumber", json!([]), self.request_timeout)
            .await?;
        parse_quantity(&result)
    }

    async fn get_block(&self, number: u64, full_transactions: bool) -> Result<Block, ChainError> {
        let params = json!([format!("0x{:x}", number), full_transactions]);
        let result = self
            .call("eth_getBlockByNumber", params, self.request_timeout)
            .await?;
        if result.is_null() {
            return Err(ChainError::UnknownBlock(number));
        }
        serde_json::from_value(result)
            .map_err(|e| ChainError::InvalidResponse(format!("block {}: {}", number, e)))
    }

    async fn get_blocks(&self, numbers: &[u64]) -> Result<BTreeMap<u64, Block>, ChainError> {
        debug!(count = numbers.len(), "Fetching blocks");
        stream::iter(numbers.iter().copied())
            .map(|number| async move {
                let block = self.get_block(number, false).await?;
                Ok::<_, ChainError>((number, block))
            })
            .buffered(self.concurrency)
            .try_collect()
            .await
    }

    async fn get_transaction_receipt(&self, tx_hash: B256) -> Result<Receipt, ChainError> {
        let hash_str = format!("0x{:x}", tx_hash);
        let result = self
            .call("eth_getTransactionReceipt", json!([hash_str]), self.request_timeout)
            .await?;
        if result.is_null() {
            return Err(ChainError::UnknownTransaction(format!("{:x}", tx_hash)));
        }
        serde_json::from_value(result)
            .map_err(|e| ChainError::InvalidResponse(format!("receipt {}: {}", hash_str, e)))
    }

    async fn get_transaction_receipts(&self, tx_hashes: &[B256]) -> Result<Vec<Receipt>, ChainError> {
        stream::iter(tx_hashes.iter().copied())
            .map(|tx_hash| self.get_transaction_receipt(tx_hash))
            .buffered(self.concurrency)
            .try_collect()
            .await
    }

    async fn get_logs_for_range(
        &self,
        from_block: u64,
        to_block: u64,
        filter: &LogFilter,
    ) -> Result<Vec<RawLog>, ChainError> {
        let params = json!([filter.to_json(from_block, to_block)]);
        let result = self
            .call("eth_getLogs", params, self.log_query_timeout)
            .await?;
        serde_json::from_value(result).map_err(|e| {
            ChainError::InvalidResponse(format!("logs {}..={}: {}", from_block, to_block, e))
        })
    }
}
