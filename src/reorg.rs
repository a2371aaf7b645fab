//! Reorg detection against the backup window.
//!
//! Walks the backed-up blocks from the highest number down and compares
//! each stored hash with the node's current hash at that height. The first
//! match is the highest common ancestor; if it is the local tip, nothing
//! changed.

use crate::error::{ChainError, IngestError};
use crate::rpc::ChainClient;
use crate::store::EventStore;
use tracing::{debug, warn};

/// Result of a reorg check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorgOutcome {
    NoReorg,
    /// Blocks above `common_ancestor` must be rolled back.
    Reorg { common_ancestor: u64 },
}

impl ReorgOutcome {
    pub fn occurred(&self) -> bool {
        matches!(self, Self::Reorg { .. })
    }

    pub fn common_ancestor(&self) -> Option<u64> {
        match self {
            Self::NoReorg => None,
            Self::Reorg { common_ancestor } => Some(*common_ancestor),
        }
    }
}

/// Compares the backup window with the node's view of the chain.
pub struct ReorgDetector<'a, C, S> {
    client: &'a C,
    store: &'a S,
}

impl<'a, C: ChainClient, S: EventStore> ReorgDetector<'a, C, S> {
    pub fn new(client: &'a C, store: &'a S) -> Self {
        Self { client, store }
    }

    /// Check whether the chain still contains the block at `local_tip`.
    ///
    /// When the node reports a lower height than `local_tip`, only backups at
    /// or below `remote_tip` are candidates.
    pub async fn detect(&self, local_tip: u64, remote_tip: u64) -> Result<ReorgOutcome, IngestError> {
        let backups = self
            .store
            .backup_index_desc(None)
            .map_err(IngestError::Storage)?;
        let Some(&(_, oldest_hash)) = backups.last() else {
            debug!("No backed-up blocks, skipping reorg check");
            return Ok(ReorgOutcome::NoReorg);
        };

        let candidates = backups
            .iter()
            .filter(|(number, _)| remote_tip >= local_tip || *number <= remote_tip);
        for &(number, stored_hash) in candidates {
            let remote = self.client.get_block(number, false).await.map_err(|e| match e {
                ChainError::UnknownBlock(block_number) => IngestError::UnknownBlockReorg { block_number },
                other => IngestError::Chain(other),
            })?;
            if remote.hash == stored_hash {
                if number == local_tip {
                    return Ok(ReorgOutcome::NoReorg);
                }
                warn!(
                    local_tip,
                    remote_tip,
                    common_ancestor = number,
                    "Chain reorganization detected"
                );
                return Ok(ReorgOutcome::Reorg {
                    common_ancestor: number,
                });
            }
            debug!(block = number, stored = %stored_hash, remote = %remote.hash, "Block hash changed");
        }

        Err(IngestError::InsufficientBackup {
            local_tip,
            remote_tip,
            oldest_backed_up_hash: hex::encode(oldest_hash),
        })
    }
}
