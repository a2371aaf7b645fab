//! EventStore trait and RocksDB implementation
//!
//! Persists the singleton `IngestionState` and the bounded window of
//! `BlockBackup` rows. Uses a RocksDB `TransactionDB` so every
//! read-modify-write runs in one transaction with `get_for_update` as the
//! row lock, which is what makes the lock flag safe across processes
//! sharing the database.

use crate::keys::{
    backup_index_lower_bound, backup_index_upper_bound, decode_backup_index_key,
    encode_backup_index_key, encode_backup_key, encode_meta_key, META_INGESTION_STATE,
};
use crate::records::{AppliedEvent, BlockBackup, DaemonStatus, IngestionState, LockAcquisition};
use alloy_primitives::B256;
use anyhow::{Context, Result};
use rocksdb::{
    ColumnFamilyDescriptor, Direction, IteratorMode, Options, TransactionDB, TransactionDBOptions,
};
use std::path::Path;
use tracing::debug;

const CF_META: &str = "meta";
const CF_BLOCK_BACKUPS: &str = "block_backups";
const CF_BACKUP_INDEX: &str = "backup_index";

/// Persistent state of the ingestion daemon.
///
/// Covers the singleton `IngestionState` (progress, status, lock flag) and the
/// backup window used for reorg detection and rollback.
pub trait EventStore: Send + Sync {
    /// Get the ingestion state, creating the initial record on first access.
    fn state(&self) -> Result<IngestionState>;

    /// Persist ingestion progress.
    fn set_last_processed_block(&self, block: u64) -> Result<()>;

    /// Set EXECUTING / HALTED.
    fn set_status(&self, status: DaemonStatus) -> Result<()>;

    /// Halt and record the error position.
    ///
    /// Sets `last_error_block = last_processed_block` and `last_error_time = now`.
    /// Returns `true` if an alert should be sent: there was no previous error,
    /// or it happened at a different block.
    fn record_error(&self) -> Result<bool>;

    /// Atomically flip the lock flag from false to true if the daemon is executing.
    ///
    /// Nothing is written when the daemon is halted or the lock is already held.
    fn try_acquire_lock(&self) -> Result<LockAcquisition>;

    /// Clear the lock flag.
    fn release_lock(&self) -> Result<()>;

    /// Clear a lock whose state record has not been written for `stale_after_secs`.
    ///
    /// Returns `true` if a stale lock was cleared.
    fn clear_stale_lock(&self, now: i64, stale_after_secs: i64) -> Result<bool>;

    /// Get-or-create the backup row for `block_hash`.
    ///
    /// An existing row is returned unchanged.
    fn append_backup(&self, block_number: u64, block_hash: B256, timestamp: u64)
        -> Result<BlockBackup>;

    /// Append an applied event to the backup row of `block_hash`.
    fn record_event(&self, block_hash: B256, event: AppliedEvent) -> Result<()>;

    /// Get a backup row by block hash.
    fn get_backup(&self, block_hash: B256) -> Result<Option<BlockBackup>>;

    /// (block_number, block_hash) of every backup row, highest number first.
    ///
    /// With `max_block`, only rows with `block_number <= max_block`.
    fn backup_index_desc(&self, max_block: Option<u64>) -> Result<Vec<(u64, B256)>>;

    /// Backup rows with `block_number > block`, highest number first.
    fn backups_after(&self, block: u64) -> Result<Vec<BlockBackup>>;

    /// Delete backup rows with `block_number > block`. Returns the number deleted.
    fn delete_backups_after(&self, block: u64) -> Result<usize>;

    /// Delete backup rows with `block_number < keep_from`. Returns the number deleted.
    fn prune_backups(&self, keep_from: u64) -> Result<usize>;

    /// Force resync: delete every backup row and reset the ingestion state.
    fn reset(&self) -> Result<()>;
}

/// RocksDB-backed implementation of EventStore.
///
/// Uses column families to organize different types of data:
/// - meta: the singleton ingestion state
/// - block_backups: backup rows keyed by block hash
/// - backup_index: (block_number, block_hash) ordering index, empty values
pub struct RocksEventStore {
    db: TransactionDB,
}

impl RocksEventStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all required column families if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let column_families = vec![
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
            ColumnFamilyDescriptor::new(CF_BLOCK_BACKUPS, Options::default()),
            ColumnFamilyDescriptor::new(CF_BACKUP_INDEX, Options::default()),
        ];

        let db = TransactionDB::open_cf_descriptors(
            &opts,
            &TransactionDBOptions::default(),
            path,
            column_families,
        )
        .context("Failed to open RocksDB database")?;

        Ok(Self { db })
    }

    /// Get a column family handle by name.
    fn get_cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .with_context(|| format!("Column family '{}' not found", name))
    }

    /// Read-modify-write the state record in one transaction.
    ///
    /// The record is only written (and `updated_at` refreshed) if `f` changed it.
    fn update_state<R>(&self, f: impl FnOnce(&mut IngestionState) -> R) -> Result<R> {
        let cf = self.get_cf(CF_META)?;
        let key = encode_meta_key(META_INGESTION_STATE);
        let now = now_secs();

        let txn = self.db.transaction();
        let existing = txn
            .get_for_update_cf(cf, &key, true)
            .context("Failed to lock ingestion state")?;
        let (mut state, created) = match existing {
            Some(bytes) => (
                postcard::from_bytes::<IngestionState>(&bytes)
                    .context("Failed to deserialize ingestion state")?,
                false,
            ),
            None => (IngestionState::new(now), true),
        };

        let before = state.clone();
        let result = f(&mut state);
        if created || state != before {
            if state != before {
                state.updated_at = now;
            }
            let value =
                postcard::to_allocvec(&state).context("Failed to serialize ingestion state")?;
            txn.put_cf(cf, &key, &value)
                .context("Failed to put ingestion state")?;
        }
        txn.commit().context("Failed to commit ingestion state")?;
        Ok(result)
    }

    fn read_backup(&self, block_hash: B256) -> Result<Option<BlockBackup>> {
        let cf = self.get_cf(CF_BLOCK_BACKUPS)?;
        let key = encode_backup_key(block_hash);
        match self.db.get_cf(cf, &key).context("Failed to get backup")? {
            Some(bytes) => {
                let backup = postcard::from_bytes(&bytes)
                    .context("Failed to deserialize block backup")?;
                Ok(Some(backup))
            }
            None => Ok(None),
        }
    }

    /// Index entries matching `keep`, scanning from `mode` until `keep` first fails.
    fn scan_index(
        &self,
        mode: IteratorMode,
        keep: impl Fn(u64) -> bool,
    ) -> Result<Vec<(u64, B256)>> {
        let cf = self.get_cf(CF_BACKUP_INDEX)?;
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(cf, mode) {
            let (key, _) = item.context("Failed to read backup index")?;
            let (number, hash) =
                decode_backup_index_key(&key).context("Failed to decode backup index key")?;
            if !keep(number) {
                break;
            }
            entries.push((number, hash));
        }
        Ok(entries)
    }

    /// Delete backup rows and their index entries in one transaction.
    fn delete_entries(&self, entries: &[(u64, B256)]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let backups_cf = self.get_cf(CF_BLOCK_BACKUPS)?;
        let index_cf = self.get_cf(CF_BACKUP_INDEX)?;

        let txn = self.db.transaction();
        for (number, hash) in entries {
            txn.delete_cf(backups_cf, encode_backup_key(*hash))
                .context("Failed to delete backup")?;
            txn.delete_cf(index_cf, encode_backup_index_key(*number, *hash))
                .context("Failed to delete backup index entry")?;
        }
        txn.commit().context("Failed to commit backup deletion")?;
        Ok(entries.len())
    }
}

impl EventStore for RocksEventStore {
    fn state(&self) -> Result<IngestionState> {
        self.update_state(|state| state.clone())
    }

    fn set_last_processed_block(&self, block: u64) -> Result<()> {
        self.update_state(|state| state.last_processed_block = block)
    }

    fn set_status(&self, status: DaemonStatus) -> Result<()> {
        self.update_state(|state| state.status = status)
    }

    fn record_error(&self) -> Result<bool> {
        let now = now_secs();
        self.update_state(|state| {
            let should_alert = state.last_error_time.is_none()
                || state.last_error_block != state.last_processed_block;
            state.status = DaemonStatus::Halted;
            state.last_error_block = state.last_processed_block;
            state.last_error_time = Some(now);
            should_alert
        })
    }

    fn try_acquire_lock(&self) -> Result<LockAcquisition> {
        self.update_state(|state| {
            if state.is_halted() {
                LockAcquisition::Halted
            } else if state.lock_held {
                LockAcquisition::Held
            } else {
                state.lock_held = true;
                LockAcquisition::Acquired
            }
        })
    }

    fn release_lock(&self) -> Result<()> {
        self.update_state(|state| state.lock_held = false)
    }

    fn clear_stale_lock(&self, now: i64, stale_after_secs: i64) -> Result<bool> {
        self.update_state(|state| {
            if state.lock_held && now.saturating_sub(state.updated_at) >= stale_after_secs {
                state.lock_held = false;
                true
            } else {
                false
            }
        })
    }

    fn append_backup(
        &self,
        block_number: u64,
        block_hash: B256,
        timestamp: u64,
    ) -> Result<BlockBackup> {
        let backups_cf = self.get_cf(CF_BLOCK_BACKUPS)?;
        let index_cf = self.get_cf(CF_BACKUP_INDEX)?;
        let key = encode_backup_key(block_hash);

        let txn = self.db.transaction();
        if let Some(bytes) = txn
            .get_for_update_cf(backups_cf, &key, true)
            .context("Failed to lock backup")?
        {
            let backup = postcard::from_bytes(&bytes)
                .context("Failed to deserialize block backup")?;
            txn.commit().context("Failed to commit backup read")?;
            return Ok(backup);
        }

        let backup = BlockBackup::new(block_number, block_hash, timestamp);
        let value = postcard::to_allocvec(&backup).context("Failed to serialize block backup")?;
        txn.put_cf(backups_cf, &key, &value)
            .context("Failed to put backup")?;
        txn.put_cf(index_cf, encode_backup_index_key(block_number, block_hash), b"")
            .context("Failed to put backup index entry")?;
        txn.commit().context("Failed to commit backup")?;

        debug!(block = block_number, hash = %block_hash, "Backed up block");
        Ok(backup)
    }

    fn record_event(&self, block_hash: B256, event: AppliedEvent) -> Result<()> {
        let cf = self.get_cf(CF_BLOCK_BACKUPS)?;
        let key = encode_backup_key(block_hash);

        let txn = self.db.transaction();
        let bytes = txn
            .get_for_update_cf(cf, &key, true)
            .context("Failed to lock backup")?
            .with_context(|| format!("No backup for block {}", block_hash))?;
        let mut backup: BlockBackup =
            postcard::from_bytes(&bytes).context("Failed to deserialize block backup")?;
        backup.applied_events.push(event);
        let value = postcard::to_allocvec(&backup).context("Failed to serialize block backup")?;
        txn.put_cf(cf, &key, &value)
            .context("Failed to put backup")?;
        txn.commit().context("Failed to commit applied event")?;
        Ok(())
    }

    fn get_backup(&self, block_hash: B256) -> Result<Option<BlockBackup>> {
        self.read_backup(block_hash)
    }

    fn backup_index_desc(&self, max_block: Option<u64>) -> Result<Vec<(u64, B256)>> {
        match max_block {
            Some(max) => {
                let start = backup_index_upper_bound(max);
                self.scan_index(IteratorMode::From(&start, Direction::Reverse), |_| true)
            }
            None => self.scan_index(IteratorMode::End, |_| true),
        }
    }

    fn backups_after(&self, block: u64) -> Result<Vec<BlockBackup>> {
        let entries = self.scan_index(IteratorMode::End, |number| number > block)?;
        let mut backups = Vec::with_capacity(entries.len());
        for (number, hash) in entries {
            let backup = self
                .read_backup(hash)?
                .with_context(|| format!("Backup index entry {} without backup row", number))?;
            backups.push(backup);
        }
        Ok(backups)
    }

    fn delete_backups_after(&self, block: u64) -> Result<usize> {
        let entries = self.scan_index(IteratorMode::End, |number| number > block)?;
        self.delete_entries(&entries)
    }

    fn prune_backups(&self, keep_from: u64) -> Result<usize> {
        let start = backup_index_lower_bound(0);
        let entries = self.scan_index(IteratorMode::From(&start, Direction::Forward), |number| {
            number < keep_from
        })?;
        self.delete_entries(&entries)
    }

    fn reset(&self) -> Result<()> {
        let entries = self.scan_index(IteratorMode::End, |_| true)?;
        self.delete_entries(&entries)?;

        let cf = self.get_cf(CF_META)?;
        let key = encode_meta_key(META_INGESTION_STATE);
        let value = postcard::to_allocvec(&IngestionState::new(now_secs()))
            .context("Failed to serialize ingestion state")?;
        let txn = self.db.transaction();
        txn.get_for_update_cf(cf, &key, true)
            .context("Failed to lock ingestion state")?;
        txn.put_cf(cf, &key, &value)
            .context("Failed to put ingestion state")?;
        txn.commit().context("Failed to commit state reset")?;
        Ok(())
    }
}

/// Current Unix time in seconds.
pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
