//! Error types for the ingestion pipeline
//!
//! Three layers of errors:
//! - `ChainError` is returned by `ChainClient` implementations.
//! - `DecodeError` is returned by the `LogDecoder`.
//! - `IngestError` is the result of one ingestion pass. The daemon wrapper
//!   uses `IngestError::is_recoverable` to decide between "log and retry on the
//!   next tick" and "halt the daemon".

use thiserror::Error;

/// Errors raised while talking to the remote node.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Connection refused/reset, timeout, or any other transport failure.
    #[error("remote node unavailable: {0}")]
    RemoteUnavailable(String),

    /// The node has no block at this height (yet, or anymore).
    #[error("unknown block {0}")]
    UnknownBlock(u64),

    /// The node returned no receipt for this transaction, usually a reorg racing the read.
    #[error("unknown transaction 0x{0}")]
    UnknownTransaction(String),

    /// The node answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The node answered with something we could not parse.
    #[error("invalid RPC response: {0}")]
    InvalidResponse(String),
}

/// Errors raised while decoding a raw log.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The log's primary topic does not match any registered event.
    #[error("unknown log topic {0}")]
    UnknownTopic(String),

    /// Malformed address, hash or topic in the log.
    #[error("validation error: {0}")]
    Validation(String),

    /// The data payload does not match the registered ABI.
    #[error("ABI decode failed: {0}")]
    Abi(String),
}

impl DecodeError {
    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }
}

/// Errors that end an ingestion pass.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// The node could not return a hash for a backed-up block during reorg detection.
    #[error("unknown block {block_number} while checking for reorgs")]
    UnknownBlockReorg { block_number: u64 },

    /// No backed-up block matches the node's chain: the reorg is deeper than the backup window.
    #[error(
        "not enough backup blocks to roll back reorg (local tip {local_tip}, remote tip {remote_tip}, oldest backup {oldest_backed_up_hash})"
    )]
    InsufficientBackup {
        local_tip: u64,
        remote_tip: u64,
        oldest_backed_up_hash: String,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A receiver's save or rollback failed.
    #[error("receiver '{receiver}' failed: {source:#}")]
    Receiver {
        receiver: String,
        #[source]
        source: anyhow::Error,
    },

    /// The watched addresses of a contract could not be resolved.
    #[error("could not retrieve watched addresses for contract '{contract}': {source:#}")]
    AddressLookup {
        contract: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("storage error: {0:#}")]
    Storage(#[source] anyhow::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl IngestError {
    /// Returns `true` if the pass can simply be retried on the next invocation.
    ///
    /// Transport failures and the benign races a reorg can cause (unknown block,
    /// unknown transaction, unknown topic) are recoverable. Everything else halts
    /// the daemon: receiver failures, storage failures, malformed logs and reorgs
    /// deeper than the backup window.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Chain(_) => true,
            Self::UnknownBlockReorg { .. } => true,
            Self::Decode(DecodeError::UnknownTopic(_)) => true,
            Self::Decode(_) => false,
            Self::InsufficientBackup { .. }
            | Self::Receiver { .. }
            | Self::AddressLookup { .. }
            | Self::Storage(_)
            | Self::Config(_) => false,
        }
    }

    /// Returns `true` if the error requires an operator-driven resync.
    pub fn needs_resync(&self) -> bool {
        matches!(self, Self::InsufficientBackup { .. })
    }
}
