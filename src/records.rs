//! Record types persisted by the event store
//!
//! These structs represent the data stored in RocksDB and handed to
//! receivers. They use postcard for binary serialization, which is compact
//! and deterministic, and serde_json for the admin CLI output.

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

/// Whether the daemon is allowed to run ingestion passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DaemonStatus {
    Executing,
    /// Frozen after an unrecoverable error until an operator resumes or resyncs.
    Halted,
}

/// Result of an attempt to take the ingestion lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAcquisition {
    Acquired,
    /// Another worker holds the lock.
    Held,
    /// The daemon is halted; the lock was not taken.
    Halted,
}

/// Singleton ingestion progress record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionState {
    /// Highest block number fully applied
    pub last_processed_block: u64,
    pub status: DaemonStatus,
    /// `last_processed_block` at the time of the most recent halting error
    pub last_error_block: u64,
    /// Unix seconds of the most recent halting error, `None` if there never was one
    pub last_error_time: Option<i64>,
    /// True while an ingestion pass holds the lock
    pub lock_held: bool,
    /// Unix seconds of the last write to this record
    pub updated_at: i64,
}

impl IngestionState {
    /// Initial state: nothing processed, executing, unlocked.
    pub fn new(now: i64) -> Self {
        Self {
            last_processed_block: 0,
            status: DaemonStatus::Executing,
            last_error_block: 0,
            last_error_time: None,
            lock_held: false,
            updated_at: now,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.status == DaemonStatus::Halted
    }
}

/// Backup of one processed block: its hash and the events applied for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBackup {
    pub block_number: u64,
    pub block_hash: B256,
    /// Events in application order; rollback replays them in reverse
    pub applied_events: Vec<AppliedEvent>,
    /// Block timestamp (Unix epoch seconds)
    pub timestamp: u64,
}

impl BlockBackup {
    pub fn new(block_number: u64, block_hash: B256, timestamp: u64) -> Self {
        Self {
            block_number,
            block_hash,
            applied_events: Vec::new(),
            timestamp,
        }
    }

    /// Block descriptor handed to receivers on rollback.
    pub fn block_info(&self) -> BlockInfo {
        BlockInfo {
            hash: hex::encode(self.block_hash),
            number: self.block_number,
            timestamp: self.timestamp,
        }
    }
}

/// An event a receiver confirmed as saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedEvent {
    /// Identifier of the receiver that saved the event
    pub receiver: String,
    pub event: DecodedEvent,
}

/// A log decoded against a registered event ABI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedEvent {
    /// Emitting contract (40 lowercase hex chars, no prefix)
    pub contract_address: String,
    pub event_name: String,
    /// Transaction hash (64 lowercase hex chars, no prefix)
    pub transaction_hash: String,
    /// Parameters in declaration order
    pub params: Vec<EventParam>,
}

impl DecodedEvent {
    /// Value of the first parameter with this name.
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventParam {
    pub name: String,
    pub value: ParamValue,
}

/// A decoded ABI value.
///
/// Integers are kept as decimal strings so arbitrarily wide values survive
/// both postcard and JSON unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamValue {
    /// Normalized address (40 lowercase hex chars, no prefix)
    Address(String),
    Uint(String),
    Int(String),
    Bool(bool),
    /// `bytes`, `bytesN`, and indexed reference types (their 32-byte topic hash)
    Bytes(Vec<u8>),
    String(String),
    /// Arrays and tuples
    Array(Vec<ParamValue>),
}

impl ParamValue {
    pub fn as_address(&self) -> Option<&str> {
        match self {
            Self::Address(a) => Some(a),
            _ => None,
        }
    }
}

/// Block descriptor passed to receivers with every save and rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Block hash (64 lowercase hex chars, no prefix)
    pub hash: String,
    pub number: u64,
    pub timestamp: u64,
}

/// Opaque handle returned by a receiver that persisted an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveReceipt {
    pub id: String,
}

impl SaveReceipt {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}
