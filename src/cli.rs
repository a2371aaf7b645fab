//! CLI implementation for logtailctl
//!
//! Administrative commands against the daemon's database: inspect progress
//! and the backup window, resume a halted daemon, clear a stuck lock, or
//! force a resync. All commands output pretty JSON.

use crate::normalize::normalize_hash_str;
use crate::records::DaemonStatus;
use crate::store::{EventStore, RocksEventStore};
use alloy_primitives::B256;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Ingestion daemon administration tool
#[derive(Parser)]
#[command(name = "logtailctl")]
#[command(about = "Inspect and administer a logtail database")]
pub struct Cli {
    /// Path to the RocksDB database directory
    #[arg(short, long, default_value = "./logtail_db")]
    db_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the ingestion state
    Status,
    /// Set a halted daemon back to executing
    Resume,
    /// Clear the ingestion lock
    Unlock,
    /// Delete every block backup and restart ingestion from scratch
    Resync {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
    /// List backed-up blocks, newest first
    Backups {
        /// Maximum number of blocks to list
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one backed-up block with its applied events
    Backup {
        /// Block hash in hex (64 hex chars, with or without 0x prefix)
        hash: String,
    },
}

/// Parse a hex string into a 32-byte hash (B256).
fn parse_hash(s: &str) -> Result<B256> {
    let normalized = normalize_hash_str(s)?;
    let bytes = hex::decode(&normalized).with_context(|| format!("Invalid hex hash: {}", s))?;
    Ok(B256::from_slice(&bytes))
}

/// Run the CLI command and print JSON output.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let store = RocksEventStore::open(&cli.db_path)
        .with_context(|| format!("Failed to open database at {:?}", cli.db_path))?;

    let result = execute(&store, cli.command)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Execute one command against a store.
pub fn execute<S: EventStore>(store: &S, command: Commands) -> Result<Value> {
    let result = match command {
        Commands::Status => {
            let state = store.state()?;
            json!({
                "last_processed_block": state.last_processed_block,
                "status": state.status,
                "last_error_block": state.last_error_block,
                "last_error_time": state.last_error_time,
                "lock_held": state.lock_held,
                "updated_at": state.updated_at,
            })
        }
        Commands::Resume => {
            store.set_status(DaemonStatus::Executing)?;
            json!({ "status": "ok", "daemon_status": DaemonStatus::Executing })
        }
        Commands::Unlock => {
            let was_held = store.state()?.lock_held;
            store.release_lock()?;
            json!({ "status": "ok", "was_held": was_held })
        }
        Commands::Resync { yes } => {
            if !yes {
                anyhow::bail!("Resync deletes every block backup and resets progress; pass --yes to confirm");
            }
            let deleted = store.backup_index_desc(None)?.len();
            store.reset()?;
            json!({ "status": "ok", "backups_deleted": deleted })
        }
        Commands::Backups { limit } => {
            let mut blocks = Vec::new();
            for (number, hash) in store.backup_index_desc(None)?.into_iter().take(limit) {
                let events = store
                    .get_backup(hash)?
                    .map(|b| b.applied_events.len())
                    .unwrap_or(0);
                blocks.push(json!({
                    "block": number,
                    "hash": format!("0x{:x}", hash),
                    "events": events,
                }));
            }
            json!({ "backups": blocks })
        }
        Commands::Backup { hash } => {
            let hash_val = parse_hash(&hash)?;
            match store.get_backup(hash_val)? {
                Some(backup) => json!({
                    "hash": format!("0x{:x}", hash_val),
                    "block": backup.block_number,
                    "timestamp": backup.timestamp,
                    "applied_events": backup.applied_events,
                }),
                None => json!({
                    "hash": format!("0x{:x}", hash_val),
                    "backup": null
                }),
            }
        }
    };
    Ok(result)
}
