//! One ingestion pass
//!
//! `IngestionEngine::pass` brings the local view up to date with the node:
//! it undoes half-applied blocks from an interrupted pass, repairs reorgs,
//! processes the next block range and prunes the backup window. Locking,
//! halting and alerting live in `daemon`.

use crate::config::DaemonConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::{ChainError, IngestError};
use crate::records::{AppliedEvent, BlockBackup};
use crate::reorg::{ReorgDetector, ReorgOutcome};
use crate::rpc::ChainClient;
use crate::store::EventStore;
use crate::types::{LogFilter, RawLog};
use alloy_primitives::B256;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tunables of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub backup_depth: u64,
    pub max_blocks_per_pass: u64,
    /// Multiple of `backup_depth`; 0 disables bulk catch-up
    pub bulk_catchup_threshold: u64,
    pub prefetch_batch_size: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&DaemonConfig::default())
    }
}

impl From<&DaemonConfig> for EngineSettings {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            backup_depth: config.backup_depth,
            max_blocks_per_pass: config.max_blocks_per_pass,
            bulk_catchup_threshold: config.bulk_catchup_threshold,
            prefetch_batch_size: config.prefetch_batch_size,
        }
    }
}

/// What a pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub remote_tip: u64,
    /// Set when a reorg was repaired
    pub common_ancestor: Option<u64>,
    /// Events undone, both for reorgs and for an interrupted previous pass
    pub rolled_back: usize,
    /// Inclusive range processed, `None` when already up to date
    pub range: Option<(u64, u64)>,
    pub bulk: bool,
    pub blocks_processed: usize,
    pub events_applied: usize,
    pub pruned: usize,
}

/// A block ready to be applied.
struct PendingBlock {
    number: u64,
    hash: B256,
    timestamp: u64,
    logs: Vec<RawLog>,
}

/// Drives ingestion passes against a node and a store.
pub struct IngestionEngine<C, S> {
    client: Arc<C>,
    store: Arc<S>,
    dispatcher: EventDispatcher,
    settings: EngineSettings,
}

impl<C: ChainClient, S: EventStore> IngestionEngine<C, S> {
    pub fn new(
        client: Arc<C>,
        store: Arc<S>,
        dispatcher: EventDispatcher,
        settings: EngineSettings,
    ) -> Self {
        Self {
            client,
            store,
            dispatcher,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Run one pass. The caller holds the ingestion lock.
    pub async fn pass(&self) -> Result<PassReport, IngestError> {
        let remote_tip = self.client.get_current_block_number().await?;
        let mut report = PassReport {
            remote_tip,
            ..PassReport::default()
        };

        let mut local_tip = self.store.state().map_err(IngestError::Storage)?.last_processed_block;

        // rows above the progress marker belong to a block that never completed
        let recovered = self.roll_back_after(local_tip).await?;
        if recovered > 0 {
            warn!(block = local_tip + 1, events = recovered, "Rolled back partially applied block");
        }
        report.rolled_back += recovered;

        let outcome = ReorgDetector::new(self.client.as_ref(), self.store.as_ref())
            .detect(local_tip, remote_tip)
            .await?;
        if let ReorgOutcome::Reorg { common_ancestor } = outcome {
            report.rolled_back += self.roll_back_after(common_ancestor).await?;
            self.store
                .set_last_processed_block(common_ancestor)
                .map_err(IngestError::Storage)?;
            info!(common_ancestor, rolled_back = report.rolled_back, "Reorg repaired");
            report.common_ancestor = Some(common_ancestor);
            local_tip = common_ancestor;
        }

        if remote_tip > local_tip {
            let from = local_tip + 1;
            let to = remote_tip.min(local_tip.saturating_add(self.settings.max_blocks_per_pass));
            report.range = Some((from, to));
            report.bulk = self.use_bulk_mode(local_tip, remote_tip);
            info!(from, to, remote_tip, bulk = report.bulk, "Processing blocks");

            let (blocks, events) = if report.bulk {
                self.process_bulk(from, to).await?
            } else {
                self.process_range(from, to).await?
            };
            report.blocks_processed = blocks;
            report.events_applied = events;
            local_tip = to;
        } else {
            debug!(local_tip, remote_tip, "Up to date");
        }

        let keep_from = local_tip.saturating_sub(self.settings.backup_depth);
        report.pruned = self.store.prune_backups(keep_from).map_err(IngestError::Storage)?;

        info!(
            remote_tip,
            local_tip,
            blocks = report.blocks_processed,
            events = report.events_applied,
            rolled_back = report.rolled_back,
            pruned = report.pruned,
            "Pass complete"
        );
        Ok(report)
    }

    fn use_bulk_mode(&self, local_tip: u64, remote_tip: u64) -> bool {
        let threshold = self.settings.bulk_catchup_threshold;
        threshold > 0
            && remote_tip - local_tip > self.settings.backup_depth.saturating_mul(threshold)
    }

    /// Undo every backed-up block above `block`, highest first, replaying
    /// each block's events in reverse. Returns the number of events undone.
    async fn roll_back_after(&self, block: u64) -> Result<usize, IngestError> {
        let backups = self.store.backups_after(block).map_err(IngestError::Storage)?;
        if backups.is_empty() {
            return Ok(0);
        }

        let mut undone = 0;
        let mut iter = backups.iter().peekable();
        while let Some(backup) = iter.next() {
            undone += self.roll_back_block(backup).await?;
            let last_at_height = iter
                .peek()
                .map_or(true, |next| next.block_number != backup.block_number);
            if last_at_height {
                self.store
                    .delete_backups_after(backup.block_number - 1)
                    .map_err(IngestError::Storage)?;
            }
        }

        if undone > 0 {
            self.dispatcher.invalidate_addresses().await;
        }
        Ok(undone)
    }

    async fn roll_back_block(&self, backup: &BlockBackup) -> Result<usize, IngestError> {
        let block = backup.block_info();
        for applied in backup.applied_events.iter().rev() {
            debug!(
                block = backup.block_number,
                receiver = %applied.receiver,
                event = %applied.event.event_name,
                "Rolling back event"
            );
            self.dispatcher
                .rollback(&applied.receiver, &applied.event, &block)
                .await?;
        }
        Ok(backup.applied_events.len())
    }

    /// Normal mode: every block in the range with all of its receipts.
    async fn process_range(&self, from: u64, to: u64) -> Result<(usize, usize), IngestError> {
        let batch = self.settings.prefetch_batch_size.max(1);
        let mut blocks = 0;
        let mut events = 0;

        let mut start = from;
        while start <= to {
            let end = to.min(start.saturating_add(batch - 1));
            for pending in self.prefetch(start, end).await? {
                events += self.apply_block(&pending).await?;
                blocks += 1;
            }
            if end == u64::MAX {
                break;
            }
            start = end + 1;
        }
        Ok((blocks, events))
    }

    /// Fetch blocks `from..=to` and their receipts.
    async fn prefetch(&self, from: u64, to: u64) -> Result<Vec<PendingBlock>, IngestError> {
        let numbers: Vec<u64> = (from..=to).collect();
        let blocks = self.client.get_blocks(&numbers).await?;

        let tx_hashes: Vec<B256> = blocks.values().flat_map(|b| b.transaction_hashes()).collect();
        let mut receipts = self.client.get_transaction_receipts(&tx_hashes).await?.into_iter();
        debug!(from, to, transactions = tx_hashes.len(), "Prefetched blocks");

        let mut pending = Vec::with_capacity(numbers.len());
        for number in numbers {
            let block = blocks.get(&number).ok_or(ChainError::UnknownBlock(number))?;
            let mut logs = Vec::new();
            for _ in 0..block.transactions.len() {
                let receipt = receipts.next().ok_or_else(|| {
                    ChainError::InvalidResponse(format!("missing receipts for block {}", number))
                })?;
                logs.extend(receipt.logs);
            }
            pending.push(PendingBlock {
                number,
                hash: block.hash,
                timestamp: block.timestamp,
                logs,
            });
        }
        Ok(pending)
    }

    /// Bulk catch-up: one `eth_getLogs` per watched event covering the
    /// whole range. Only blocks with candidate logs and the tail
    /// `backup_depth` blocks are fetched and backed up.
    ///
    /// Getter-backed contracts are queried by topic alone, since a save
    /// earlier in the range may add addresses; `apply_block` filters their
    /// logs against the address set current at each block.
    async fn process_bulk(&self, from: u64, to: u64) -> Result<(usize, usize), IngestError> {
        let mut by_block: BTreeMap<u64, Vec<RawLog>> = BTreeMap::new();
        let mut seen = HashSet::new();

        for contract in self.dispatcher.contracts() {
            let addresses = if contract.has_dynamic_addresses() {
                Vec::new()
            } else {
                let watched = self.dispatcher.watched_addresses(contract).await?;
                if watched.is_empty() {
                    continue;
                }
                let mut addresses: Vec<String> = watched.into_iter().collect();
                addresses.sort();
                addresses
            };

            for method_id in contract.event_method_ids() {
                let filter = LogFilter {
                    addresses: addresses.clone(),
                    topic0: vec![method_id.clone()],
                };
                let logs = self.client.get_logs_for_range(from, to, &filter).await?;
                debug!(contract = contract.name(), event = %method_id, logs = logs.len(), "Fetched log range");
                for log in logs {
                    let number = log.block_number.ok_or_else(|| {
                        ChainError::InvalidResponse("log without blockNumber".into())
                    })?;
                    if let Some(index) = log.log_index {
                        if !seen.insert((number, index)) {
                            continue;
                        }
                    }
                    by_block.entry(number).or_default().push(log);
                }
            }
        }
        for logs in by_block.values_mut() {
            logs.sort_by_key(|log| log.log_index);
        }

        let tail_start = to.saturating_sub(self.settings.backup_depth).max(from);
        let numbers: BTreeSet<u64> = by_block.keys().copied().chain(tail_start..=to).collect();
        let numbers: Vec<u64> = numbers.into_iter().collect();

        let mut blocks = 0;
        let mut events = 0;
        for chunk in numbers.chunks(self.settings.prefetch_batch_size.max(1) as usize) {
            let headers = self.client.get_blocks(chunk).await?;
            for &number in chunk {
                let header = headers.get(&number).ok_or(ChainError::UnknownBlock(number))?;
                let pending = PendingBlock {
                    number,
                    hash: header.hash,
                    timestamp: header.timestamp,
                    logs: by_block.remove(&number).unwrap_or_default(),
                };
                events += self.apply_block(&pending).await?;
                blocks += 1;
            }
        }
        Ok((blocks, events))
    }

    /// Back up a block, dispatch its events contract by contract and
    /// advance progress. Returns the number of events receivers persisted.
    async fn apply_block(&self, pending: &PendingBlock) -> Result<usize, IngestError> {
        let backup = self
            .store
            .append_backup(pending.number, pending.hash, pending.timestamp)
            .map_err(IngestError::Storage)?;
        let block = backup.block_info();

        let mut applied = 0;
        for contract in self.dispatcher.contracts() {
            let matching = self.dispatcher.matching_logs(contract, &pending.logs).await?;
            if matching.is_empty() {
                continue;
            }
            for event in contract.decoder().decode_many(matching)? {
                if self.dispatcher.save(contract, &event, &block).await?.is_some() {
                    self.store
                        .record_event(
                            pending.hash,
                            AppliedEvent {
                                receiver: contract.receiver_id().to_string(),
                                event,
                            },
                        )
                        .map_err(IngestError::Storage)?;
                    applied += 1;
                }
            }
        }

        self.store
            .set_last_processed_block(pending.number)
            .map_err(IngestError::Storage)?;
        if applied > 0 {
            info!(block = pending.number, events = applied, "Applied events");
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContractConfig;
    use crate::decoder::LogDecoder;
    use crate::dispatcher::{CapabilityRegistry, EventReceiver};
    use crate::records::{BlockInfo, DecodedEvent, ParamValue, SaveReceipt};
    use crate::store::RocksEventStore;
    use crate::test_utils::{
        transfer_abi, transfer_log, FailWhen, MockChain, RecordingReceiver, SharedAddresses,
    };
    use async_trait::async_trait;
    use tempfile::TempDir;

    const TOKEN: &str = "a6d9c5f7d4de3cef51ad3b7235d79ccc95114de5";
    const OTHER: &str = "17e054b16ca658789c927c854976450adbda7df0";
    const TX: &str = "88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b";

    struct Harness {
        chain: Arc<MockChain>,
        store: Arc<RocksEventStore>,
        receiver: Arc<RecordingReceiver>,
        engine: IngestionEngine<MockChain, RocksEventStore>,
        _temp_dir: TempDir,
    }

    fn harness_with(receiver: RecordingReceiver, settings: EngineSettings) -> Harness {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(RocksEventStore::open(temp_dir.path()).unwrap());
        let chain = Arc::new(MockChain::new());
        let receiver = Arc::new(receiver);

        let mut registry = CapabilityRegistry::new();
        registry.register_receiver("rec", receiver.clone());
        let contracts = [ContractConfig {
            name: "token".into(),
            event_abi: transfer_abi(),
            receiver: "rec".into(),
            addresses: Some(vec![TOKEN.into()]),
            addresses_getter: None,
        }];
        let dispatcher = EventDispatcher::new(&contracts, &registry).unwrap();
        let engine = IngestionEngine::new(chain.clone(), store.clone(), dispatcher, settings);
        Harness {
            chain,
            store,
            receiver,
            engine,
            _temp_dir: temp_dir,
        }
    }

    fn harness(settings: EngineSettings) -> Harness {
        harness_with(RecordingReceiver::default(), settings)
    }

    fn transfer(value: u64) -> RawLog {
        transfer_log(TOKEN, "01", "02", value, TX)
    }

    fn value_of(call: &crate::test_utils::ReceiverCall) -> String {
        match call.event.param("value") {
            Some(ParamValue::Uint(v)) => v.clone(),
            other => panic!("unexpected value {:?}", other),
        }
    }

    fn backed_up_numbers(store: &RocksEventStore) -> Vec<u64> {
        store
            .backup_index_desc(None)
            .unwrap()
            .into_iter()
            .map(|(number, _)| number)
            .collect()
    }

    #[tokio::test]
    async fn test_pass_applies_watched_events_in_order() {
        let h = harness(EngineSettings::default());
        h.chain.mine(0, 0, Vec::new());
        h.chain.mine(1, 0, vec![transfer(1), transfer_log(OTHER, "01", "02", 9, TX)]);
        h.chain.mine(2, 0, vec![transfer(2), transfer(3)]);

        let report = h.engine.pass().await.unwrap();
        assert_eq!(report.range, Some((1, 2)));
        assert!(!report.bulk);
        assert_eq!(report.blocks_processed, 2);
        assert_eq!(report.events_applied, 3);
        assert_eq!(h.store.state().unwrap().last_processed_block, 2);

        let values: Vec<String> = h.receiver.saves().iter().map(value_of).collect();
        assert_eq!(values, vec!["1", "2", "3"]);
        assert_eq!(h.receiver.saves()[0].block.number, 1);
        assert_eq!(h.receiver.saves()[0].event.contract_address, TOKEN);

        let backup = h.store.get_backup(h.chain.hash_of(2)).unwrap().unwrap();
        assert_eq!(backup.applied_events.len(), 2);
        assert_eq!(backup.applied_events[0].receiver, "rec");

        let report = h.engine.pass().await.unwrap();
        assert_eq!(report.range, None);
        assert_eq!(h.receiver.saves().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_blocks_are_backed_up() {
        let h = harness(EngineSettings::default());
        h.chain.mine_empty(0, 3, 0);

        h.engine.pass().await.unwrap();
        assert_eq!(backed_up_numbers(&h.store), vec![3, 2, 1]);
        assert!(h.receiver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_skipped_saves_are_not_recorded() {
        let h = harness_with(RecordingReceiver::skipping(), EngineSettings::default());
        h.chain.mine(1, 0, vec![transfer(1)]);

        let report = h.engine.pass().await.unwrap();
        assert_eq!(report.events_applied, 0);
        let backup = h.store.get_backup(h.chain.hash_of(1)).unwrap().unwrap();
        assert!(backup.applied_events.is_empty());
    }

    #[tokio::test]
    async fn test_reorg_rolls_back_in_reverse_order() {
        let h = harness(EngineSettings::default());
        h.chain.mine(1, 0, Vec::new());
        h.chain.mine(2, 0, vec![transfer(1)]);
        h.chain.mine(3, 0, vec![transfer(2), transfer(3)]);
        h.engine.pass().await.unwrap();
        let orphaned = h.chain.hash_of(3);

        h.chain.mine(2, 1, vec![transfer(4)]);
        h.chain.mine(3, 1, Vec::new());

        let report = h.engine.pass().await.unwrap();
        assert_eq!(report.common_ancestor, Some(1));
        assert_eq!(report.rolled_back, 3);
        assert_eq!(report.range, Some((2, 3)));

        let rollbacks = h.receiver.rollbacks();
        let values: Vec<String> = rollbacks.iter().map(value_of).collect();
        assert_eq!(values, vec!["3", "2", "1"]);
        let blocks: Vec<u64> = rollbacks.iter().map(|c| c.block.number).collect();
        assert_eq!(blocks, vec![3, 3, 2]);
        assert_eq!(rollbacks[0].block.hash, hex::encode(orphaned));

        assert!(h.store.get_backup(orphaned).unwrap().is_none());
        let replacement = h.store.get_backup(h.chain.hash_of(2)).unwrap().unwrap();
        assert_eq!(replacement.applied_events.len(), 1);
        assert_eq!(h.store.state().unwrap().last_processed_block, 3);
        assert_eq!(value_of(h.receiver.saves().last().unwrap()), "4");
    }

    #[tokio::test]
    async fn test_unrepairable_reorg_leaves_progress() {
        let h = harness(EngineSettings::default());
        h.chain.mine(1, 0, vec![transfer(1)]);
        h.chain.mine(2, 0, Vec::new());
        h.engine.pass().await.unwrap();

        h.chain.mine_empty(0, 2, 1);
        let err = h.engine.pass().await.unwrap_err();
        assert!(err.needs_resync());
        assert!(h.receiver.rollbacks().is_empty());
        assert_eq!(h.store.state().unwrap().last_processed_block, 2);
    }

    #[tokio::test]
    async fn test_prune_keeps_backup_window() {
        let h = harness(EngineSettings {
            backup_depth: 3,
            ..EngineSettings::default()
        });
        h.chain.mine_empty(0, 10, 0);

        let report = h.engine.pass().await.unwrap();
        assert_eq!(report.pruned, 6);
        assert_eq!(backed_up_numbers(&h.store), vec![10, 9, 8, 7]);
    }

    #[tokio::test]
    async fn test_range_is_capped_per_pass() {
        let h = harness(EngineSettings {
            max_blocks_per_pass: 4,
            prefetch_batch_size: 3,
            ..EngineSettings::default()
        });
        h.chain.mine_empty(0, 10, 0);

        assert_eq!(h.engine.pass().await.unwrap().range, Some((1, 4)));
        assert_eq!(h.engine.pass().await.unwrap().range, Some((5, 8)));
        assert_eq!(h.engine.pass().await.unwrap().range, Some((9, 10)));
        assert_eq!(h.store.state().unwrap().last_processed_block, 10);
    }

    #[tokio::test]
    async fn test_bulk_catchup_uses_log_ranges() {
        let h = harness(EngineSettings {
            backup_depth: 2,
            bulk_catchup_threshold: 2,
            ..EngineSettings::default()
        });
        h.chain.mine_empty(0, 20, 0);
        h.chain.mine(5, 0, vec![transfer(5)]);
        h.chain.mine(19, 0, vec![transfer(19), transfer_log(OTHER, "01", "02", 1, TX)]);

        let report = h.engine.pass().await.unwrap();
        assert!(report.bulk);
        assert_eq!(report.range, Some((1, 20)));
        assert_eq!(report.events_applied, 2);
        // block 5 plus the tail 18..=20
        assert_eq!(report.blocks_processed, 4);
        assert_eq!(h.chain.log_queries(), 1);
        assert_eq!(h.chain.receipt_queries(), 0);

        let saves = h.receiver.saves();
        assert_eq!(saves.iter().map(value_of).collect::<Vec<_>>(), vec!["5", "19"]);
        assert_eq!(saves[0].block.hash, hex::encode(h.chain.hash_of(5)));
        assert_eq!(h.store.state().unwrap().last_processed_block, 20);
        assert_eq!(backed_up_numbers(&h.store), vec![20, 19, 18]);

        // caught up: back to per-block processing
        h.chain.mine(21, 0, vec![transfer(21)]);
        let report = h.engine.pass().await.unwrap();
        assert!(!report.bulk);
        assert_eq!(report.events_applied, 1);
    }

    /// Factory receiver: every saved event registers `address` with the getter.
    struct RegisteringReceiver {
        getter: Arc<SharedAddresses>,
        address: &'static str,
    }

    #[async_trait]
    impl EventReceiver for RegisteringReceiver {
        async fn save(
            &self,
            event: &DecodedEvent,
            _block: &BlockInfo,
        ) -> anyhow::Result<Option<SaveReceipt>> {
            self.getter.push(self.address);
            Ok(Some(SaveReceipt::new(event.transaction_hash.clone())))
        }

        async fn rollback(&self, _event: &DecodedEvent, _block: &BlockInfo) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// A factory at TOKEN creates a wallet at OTHER in block 5; the wallet
    /// emits in block 10. Returns the wallet saves and whether bulk mode ran.
    async fn wallet_saves_after_factory(bulk_catchup_threshold: u64) -> (usize, bool) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(RocksEventStore::open(temp_dir.path()).unwrap());
        let chain = Arc::new(MockChain::new());
        chain.mine_empty(0, 20, 0);
        chain.mine(5, 0, vec![transfer(1)]);
        chain.mine(10, 0, vec![transfer_log(OTHER, "01", "02", 7, TX)]);

        let getter = Arc::new(SharedAddresses::new(Vec::new()));
        let wallets = Arc::new(RecordingReceiver::default());
        let mut registry = CapabilityRegistry::new();
        registry.register_receiver(
            "factory",
            Arc::new(RegisteringReceiver {
                getter: getter.clone(),
                address: OTHER,
            }),
        );
        registry.register_receiver("wallets", wallets.clone());
        registry.register_addresses_getter("wallets", getter);
        let contracts = [
            ContractConfig {
                name: "factory".into(),
                event_abi: transfer_abi(),
                receiver: "factory".into(),
                addresses: Some(vec![TOKEN.into()]),
                addresses_getter: None,
            },
            ContractConfig {
                name: "wallets".into(),
                event_abi: transfer_abi(),
                receiver: "wallets".into(),
                addresses: None,
                addresses_getter: Some("wallets".into()),
            },
        ];
        let dispatcher = EventDispatcher::new(&contracts, &registry).unwrap();
        let engine = IngestionEngine::new(
            chain,
            store.clone(),
            dispatcher,
            EngineSettings {
                backup_depth: 2,
                bulk_catchup_threshold,
                ..EngineSettings::default()
            },
        );

        let report = engine.pass().await.unwrap();
        assert_eq!(store.state().unwrap().last_processed_block, 20);
        let saves = wallets.saves();
        if let Some(save) = saves.first() {
            assert_eq!(save.block.number, 10);
            assert_eq!(save.event.contract_address, OTHER);
        }
        (saves.len(), report.bulk)
    }

    #[tokio::test]
    async fn test_bulk_catchup_follows_addresses_registered_in_range() {
        assert_eq!(wallet_saves_after_factory(0).await, (1, false));
        assert_eq!(wallet_saves_after_factory(2).await, (1, true));
    }

    #[tokio::test]
    async fn test_interrupted_block_is_rolled_back_before_reprocessing() {
        let h = harness(EngineSettings {
            max_blocks_per_pass: 1,
            ..EngineSettings::default()
        });
        h.chain.mine(1, 0, Vec::new());
        h.chain.mine(2, 0, vec![transfer(7)]);
        h.engine.pass().await.unwrap();

        // a crashed pass saved one event of block 2 without advancing progress
        let event = LogDecoder::from_abi(&transfer_abi())
            .unwrap()
            .decode(&transfer(7))
            .unwrap();
        h.store.append_backup(2, h.chain.hash_of(2), 0).unwrap();
        h.store
            .record_event(
                h.chain.hash_of(2),
                AppliedEvent {
                    receiver: "rec".into(),
                    event,
                },
            )
            .unwrap();

        let report = h.engine.pass().await.unwrap();
        assert_eq!(report.rolled_back, 1);
        assert_eq!(report.common_ancestor, None);
        assert_eq!(h.receiver.rollbacks().len(), 1);
        assert_eq!(h.receiver.saves().len(), 1);
        let backup = h.store.get_backup(h.chain.hash_of(2)).unwrap().unwrap();
        assert_eq!(backup.applied_events.len(), 1);
        assert_eq!(h.store.state().unwrap().last_processed_block, 2);
    }

    #[tokio::test]
    async fn test_receiver_failure_stops_at_previous_block() {
        let receiver = RecordingReceiver::default();
        receiver.fail_when(FailWhen::AtBlock(2));
        let h = harness_with(receiver, EngineSettings::default());
        h.chain.mine(1, 0, vec![transfer(1)]);
        h.chain.mine(2, 0, vec![transfer(2)]);
        h.chain.mine(3, 0, vec![transfer(3)]);

        let err = h.engine.pass().await.unwrap_err();
        assert!(matches!(err, IngestError::Receiver { .. }));
        assert_eq!(h.store.state().unwrap().last_processed_block, 1);

        h.receiver.fail_when(FailWhen::Never);
        let report = h.engine.pass().await.unwrap();
        assert_eq!(report.range, Some((2, 3)));
        assert_eq!(h.store.state().unwrap().last_processed_block, 3);
        let values: Vec<String> = h.receiver.saves().iter().map(value_of).collect();
        assert_eq!(values, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_unreachable_node_aborts_pass() {
        let h = harness(EngineSettings::default());
        h.chain.mine_empty(0, 2, 0);
        h.chain.set_unavailable(true);

        let err = h.engine.pass().await.unwrap_err();
        assert!(matches!(err, IngestError::Chain(ChainError::RemoteUnavailable(_))));
        assert!(err.is_recoverable());
        assert_eq!(h.store.state().unwrap().last_processed_block, 0);
    }
}
