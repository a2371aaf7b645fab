//! Daemon configuration loading
//!
//! The daemon reads one JSON file describing the node, the tunables of the
//! ingestion engine and the watched contracts. Missing tunables take their
//! defaults.
//!
//! # Example file format:
//! ```json
//! {
//!   "backup_depth": 100,
//!   "rpc": { "url": "http://127.0.0.1:8545" },
//!   "contracts": [
//!     {
//!       "name": "token",
//!       "event_abi": [{ "type": "event", "name": "Transfer", "inputs": [] }],
//!       "receiver": "log",
//!       "addresses": ["0xa6d9c5f7d4de3cef51ad3b7235d79ccc95114de5"]
//!     }
//!   ]
//! }
//! ```

use crate::decoder::EventDescriptor;
use crate::error::IngestError;
use crate::normalize::normalize_address_str;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Number of trailing blocks whose applied events are kept for rollback
    pub backup_depth: u64,
    /// Maximum number of blocks processed in one pass
    pub max_blocks_per_pass: u64,
    /// Bulk catch-up kicks in when the lag exceeds `backup_depth * bulk_catchup_threshold` (0 disables)
    pub bulk_catchup_threshold: u64,
    /// Maximum in-flight requests when prefetching blocks and receipts
    pub prefetch_concurrency: usize,
    /// Number of blocks prefetched at once
    pub prefetch_batch_size: u64,
    /// A lock whose state record is older than this is considered abandoned
    pub lock_stale_after_secs: u64,
    /// Delay between passes of the daemon loop
    pub poll_interval_secs: u64,
    pub rpc: RpcConfig,
    pub contracts: Vec<ContractConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            backup_depth: 100,
            max_blocks_per_pass: 10_000,
            bulk_catchup_threshold: 10,
            prefetch_concurrency: 8,
            prefetch_batch_size: 50,
            lock_stale_after_secs: 600,
            poll_interval_secs: 12,
            rpc: RpcConfig::default(),
            contracts: Vec::new(),
        }
    }
}

/// Remote node settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub url: String,
    /// Timeout of interactive calls (tip, blocks, receipts)
    pub request_timeout_ms: u64,
    /// Timeout of `eth_getLogs` range scans
    pub log_query_timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8545".to_string(),
            request_timeout_ms: 10_000,
            log_query_timeout_ms: 120_000,
        }
    }
}

impl RpcConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn log_query_timeout(&self) -> Duration {
        Duration::from_millis(self.log_query_timeout_ms)
    }
}

/// One watched contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractConfig {
    /// Unique name
    pub name: String,
    /// JSON ABI of the contract; non-event entries are ignored
    pub event_abi: Vec<EventDescriptor>,
    /// Identifier of the registered `EventReceiver`
    pub receiver: String,
    /// Static watched addresses
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
    /// Identifier of the registered `AddressesGetter`
    #[serde(default)]
    pub addresses_getter: Option<String>,
}

impl DaemonConfig {
    /// Check the configuration for errors that would only surface mid-pass.
    pub fn validate(&self) -> Result<(), IngestError> {
        let nonzero = [
            ("backup_depth", self.backup_depth),
            ("max_blocks_per_pass", self.max_blocks_per_pass),
            ("prefetch_concurrency", self.prefetch_concurrency as u64),
            ("prefetch_batch_size", self.prefetch_batch_size),
            ("lock_stale_after_secs", self.lock_stale_after_secs),
            ("poll_interval_secs", self.poll_interval_secs),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(IngestError::Config(format!("{} must be greater than 0", field)));
            }
        }

        let mut names = HashSet::new();
        for contract in &self.contracts {
            if contract.name.is_empty() {
                return Err(IngestError::Config("contract name must not be empty".to_string()));
            }
            if !names.insert(contract.name.as_str()) {
                return Err(IngestError::Config(format!(
                    "duplicate contract name '{}'",
                    contract.name
                )));
            }
            match (&contract.addresses, &contract.addresses_getter) {
                (Some(addresses), None) => {
                    for address in addresses {
                        normalize_address_str(address).map_err(|e| {
                            IngestError::Config(format!("contract '{}': {}", contract.name, e))
                        })?;
                    }
                }
                (None, Some(_)) => {}
                _ => {
                    return Err(IngestError::Config(format!(
                        "contract '{}' needs exactly one of 'addresses' or 'addresses_getter'",
                        contract.name
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<DaemonConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    let config: DaemonConfig = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file: {:?}", path))?;
    Ok(config)
}
