//! logtailctl - administration tool for the logtail daemon
//!
//! Inspects and repairs the ingestion state and block backups stored in the
//! daemon's RocksDB database.

use logtail::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
