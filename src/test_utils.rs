//! Test doubles shared by the unit tests: an in-memory chain, a recording
//! receiver, a recording alerter and a mutable address getter.

use crate::alert::Alerter;
use crate::decoder::{parse_abi, EventDescriptor};
use crate::dispatcher::{AddressesGetter, EventReceiver};
use crate::error::ChainError;
use crate::normalize::normalize_address;
use crate::records::{BlockInfo, DecodedEvent, SaveReceipt};
use crate::types::{Block, BlockTransaction, LogFilter, RawLog, Receipt};
use alloy_primitives::{keccak256, B256};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const TRANSFER_TOPIC: &str = "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

pub fn transfer_abi() -> Vec<EventDescriptor> {
    parse_abi(
        r#"[{"type": "event", "name": "Transfer", "anonymous": false, "inputs": [
            {"name": "from", "type": "address", "indexed": true},
            {"name": "to", "type": "address", "indexed": true},
            {"name": "value", "type": "uint256", "indexed": false}
        ]}]"#,
    )
    .unwrap()
}

/// `0x`-prefixed hex left-padded to a 32-byte topic.
pub fn padded_topic(hex: &str) -> String {
    format!("0x{:0>64}", hex)
}

/// An ERC20 `Transfer` log emitted by `contract`.
pub fn transfer_log(contract: &str, from: &str, to: &str, value: u64, tx_hash: &str) -> RawLog {
    let mut data = [0u8; 32];
    data[24..].copy_from_slice(&value.to_be_bytes());
    RawLog {
        address: Some(format!("0x{}", contract).into()),
        topics: vec![
            format!("0x{}", TRANSFER_TOPIC),
            padded_topic(from),
            padded_topic(to),
        ],
        data: data.to_vec(),
        transaction_hash: Some(tx_hash.into()),
        ..Default::default()
    }
}

/// Deterministic block hash for `number` on fork `fork`.
pub fn block_hash(number: u64, fork: u8) -> B256 {
    keccak256(format!("block-{}-{}", fork, number))
}

struct MockBlock {
    hash: B256,
    timestamp: u64,
    transactions: Vec<(B256, Vec<RawLog>)>,
}

#[derive(Default)]
struct MockChainState {
    blocks: BTreeMap<u64, MockBlock>,
    tip_override: Option<u64>,
    unavailable: bool,
}

/// In-memory chain. Each log is mined in its own transaction.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockChainState>,
    log_queries: AtomicUsize,
    receipt_queries: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mine (or replace) block `number` on fork `fork`.
    pub fn mine(&self, number: u64, fork: u8, logs: Vec<RawLog>) {
        let hash = block_hash(number, fork);
        let transactions = logs
            .into_iter()
            .enumerate()
            .map(|(i, mut log)| {
                let tx_hash = keccak256(format!("tx-{}-{}-{}", fork, number, i));
                log.transaction_hash = Some(format!("{:x}", tx_hash).into());
                log.block_number = Some(number);
                log.log_index = Some(i as u64);
                (tx_hash, vec![log])
            })
            .collect();
        self.state.lock().unwrap().blocks.insert(
            number,
            MockBlock {
                hash,
                timestamp: 1_700_000_000 + number * 12,
                transactions,
            },
        );
    }

    /// Mine empty blocks `from..=to` on fork `fork`.
    pub fn mine_empty(&self, from: u64, to: u64, fork: u8) {
        for number in from..=to {
            self.mine(number, fork, Vec::new());
        }
    }

    /// Report this height regardless of the mined blocks.
    pub fn set_tip(&self, tip: Option<u64>) {
        self.state.lock().unwrap().tip_override = tip;
    }

    /// Fail every call with `RemoteUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    pub fn hash_of(&self, number: u64) -> B256 {
        self.state.lock().unwrap().blocks[&number].hash
    }

    pub fn log_queries(&self) -> usize {
        self.log_queries.load(Ordering::SeqCst)
    }

    pub fn receipt_queries(&self) -> usize {
        self.receipt_queries.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), ChainError> {
        if self.state.lock().unwrap().unavailable {
            return Err(ChainError::RemoteUnavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl crate::rpc::ChainClient for MockChain {
    async fn get_current_block_number(&self) -> Result<u64, ChainError> {
        // let concurrent passes interleave here
        tokio::task::yield_now().await;
        self.check_available()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .tip_override
            .unwrap_or_else(|| state.blocks.keys().next_back().copied().unwrap_or(0)))
    }

    async fn get_block(&self, number: u64, _full_transactions: bool) -> Result<Block, ChainError> {
        self.check_available()?;
        let state = self.state.lock().unwrap();
        let block = state.blocks.get(&number).ok_or(ChainError::UnknownBlock(number))?;
        Ok(Block {
            number,
            hash: block.hash,
            parent_hash: B256::ZERO,
            timestamp: block.timestamp,
            transactions: block
                .transactions
                .iter()
                .map(|(tx, _)| BlockTransaction::Hash(*tx))
                .collect(),
        })
    }

    async fn get_transaction_receipt(&self, tx_hash: B256) -> Result<Receipt, ChainError> {
        self.check_available()?;
        self.receipt_queries.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        state
            .blocks
            .values()
            .flat_map(|block| block.transactions.iter())
            .find(|(tx, _)| *tx == tx_hash)
            .map(|(tx, logs)| Receipt {
                transaction_hash: *tx,
                status: Some(1),
                logs: logs.clone(),
            })
            .ok_or_else(|| ChainError::UnknownTransaction(format!("{:x}", tx_hash)))
    }

    async fn get_logs_for_range(
        &self,
        from_block: u64,
        to_block: u64,
        filter: &LogFilter,
    ) -> Result<Vec<RawLog>, ChainError> {
        self.check_available()?;
        self.log_queries.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        let logs = state
            .blocks
            .range(from_block..=to_block)
            .flat_map(|(_, block)| block.transactions.iter())
            .flat_map(|(_, logs)| logs.iter())
            .filter(|log| {
                filter.addresses.is_empty()
                    || normalize_address(log.address.as_ref())
                        .map(|a| filter.addresses.contains(&a))
                        .unwrap_or(false)
            })
            .filter(|log| {
                filter.topic0.is_empty()
                    || log
                        .topics
                        .first()
                        .map(|t| filter.topic0.iter().any(|id| t.ends_with(id.as_str())))
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        Ok(logs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallKind {
    Save,
    Rollback,
}

#[derive(Debug, Clone)]
pub struct ReceiverCall {
    pub kind: CallKind,
    pub event: DecodedEvent,
    pub block: BlockInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailWhen {
    Never,
    Always,
    AtBlock(u64),
}

/// Receiver that records every call.
pub struct RecordingReceiver {
    calls: Mutex<Vec<ReceiverCall>>,
    persist: bool,
    fail: Mutex<FailWhen>,
}

impl Default for RecordingReceiver {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            persist: true,
            fail: Mutex::new(FailWhen::Never),
        }
    }
}

impl RecordingReceiver {
    /// Receiver whose saves return `None`.
    pub fn skipping() -> Self {
        Self {
            persist: false,
            ..Self::default()
        }
    }

    /// Receiver whose saves always fail.
    pub fn failing() -> Self {
        let receiver = Self::default();
        receiver.fail_when(FailWhen::Always);
        receiver
    }

    pub fn fail_when(&self, when: FailWhen) {
        *self.fail.lock().unwrap() = when;
    }

    pub fn calls(&self) -> Vec<ReceiverCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn saves(&self) -> Vec<ReceiverCall> {
        self.calls().into_iter().filter(|c| c.kind == CallKind::Save).collect()
    }

    pub fn rollbacks(&self) -> Vec<ReceiverCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.kind == CallKind::Rollback)
            .collect()
    }
}

#[async_trait]
impl EventReceiver for RecordingReceiver {
    async fn save(
        &self,
        event: &DecodedEvent,
        block: &BlockInfo,
    ) -> anyhow::Result<Option<SaveReceipt>> {
        let fail = match *self.fail.lock().unwrap() {
            FailWhen::Never => false,
            FailWhen::Always => true,
            FailWhen::AtBlock(number) => number == block.number,
        };
        if fail {
            anyhow::bail!("receiver failed at block {}", block.number);
        }
        self.calls.lock().unwrap().push(ReceiverCall {
            kind: CallKind::Save,
            event: event.clone(),
            block: block.clone(),
        });
        Ok(self
            .persist
            .then(|| SaveReceipt::new(event.transaction_hash.clone())))
    }

    async fn rollback(&self, event: &DecodedEvent, block: &BlockInfo) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(ReceiverCall {
            kind: CallKind::Rollback,
            event: event.clone(),
            block: block.clone(),
        });
        Ok(())
    }
}

/// Address getter backed by a mutable list, counting lookups.
pub struct SharedAddresses {
    addresses: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl SharedAddresses {
    pub fn new(addresses: Vec<String>) -> Self {
        Self {
            addresses: Mutex::new(addresses),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, address: &str) {
        self.addresses.lock().unwrap().push(address.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AddressesGetter for SharedAddresses {
    async fn get_addresses(&self) -> anyhow::Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.addresses.lock().unwrap().clone())
    }
}

/// Alerter that records every alert subject.
#[derive(Default)]
pub struct RecordingAlerter {
    subjects: Mutex<Vec<String>>,
}

impl RecordingAlerter {
    pub fn count(&self) -> usize {
        self.subjects.lock().unwrap().len()
    }
}

#[async_trait]
impl Alerter for RecordingAlerter {
    async fn alert(&self, subject: &str, _body: &str) -> anyhow::Result<()> {
        self.subjects.lock().unwrap().push(subject.to_string());
        Ok(())
    }
}
