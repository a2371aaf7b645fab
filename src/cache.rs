//! Watched address cache
//!
//! In-memory cache of the address sets returned by `AddressesGetter`s, keyed
//! by contract name, to avoid querying the getter for every block.
//!
//! Strategy:
//! - A contract's set is cached on first lookup
//! - Every entry is dropped whenever a receiver persists an event, since
//!   receivers may add watched addresses as a side effect (factory contracts)

use std::collections::{HashMap, HashSet};

/// Cache of resolved watched address sets.
#[derive(Debug, Default)]
pub struct AddressCache {
    /// Map of contract name -> normalized addresses
    cache: HashMap<String, HashSet<String>>,
}

impl AddressCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached address set of a contract, `None` if not cached.
    pub fn get(&self, contract: &str) -> Option<&HashSet<String>> {
        self.cache.get(contract)
    }

    /// Cache the address set of a contract.
    pub fn insert(&mut self, contract: &str, addresses: HashSet<String>) {
        self.cache.insert(contract.to_string(), addresses);
    }

    /// Drop every cached set.
    pub fn invalidate_all(&mut self) {
        self.cache.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
