//! logtail - contract event ingestion with reorg repair
//!
//! This library follows an Ethereum node, decodes the logs of watched
//! contracts against their event ABIs and hands the events to pluggable
//! receivers. A bounded window of block backups in RocksDB lets it detect
//! chain reorganizations and roll applied events back.

pub mod error;
pub mod keys;
pub mod normalize;
pub mod records;
pub mod store;
pub mod types;

// Decoding and dispatch
pub mod cache;
pub mod decoder;
pub mod dispatcher;
pub mod receivers;

// Ingestion
pub mod alert;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod reorg;
pub mod rpc;

pub mod cli;

#[cfg(test)]
mod test_utils;

// Re-export the main types for convenience
pub use daemon::{Daemon, RunOutcome};
pub use decoder::{EventDescriptor, LogDecoder};
pub use dispatcher::{AddressesGetter, CapabilityRegistry, EventDispatcher, EventReceiver};
pub use engine::{EngineSettings, IngestionEngine, PassReport};
pub use error::{ChainError, DecodeError, IngestError};
pub use records::{
    AppliedEvent, BlockBackup, BlockInfo, DaemonStatus, DecodedEvent, EventParam,
    IngestionState, LockAcquisition, ParamValue, SaveReceipt,
};
pub use store::{EventStore, RocksEventStore};
