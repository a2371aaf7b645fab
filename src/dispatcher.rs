//! Receiver capabilities and event dispatch
//!
//! Receivers and address getters are plugged in by the surrounding
//! application through `CapabilityRegistry`; contract configurations refer
//! to them by identifier. `EventDispatcher` resolves those identifiers once
//! at startup and owns one `LogDecoder` per watched contract.

use crate::cache::AddressCache;
use crate::config::ContractConfig;
use crate::decoder::LogDecoder;
use crate::error::{DecodeError, IngestError};
use crate::normalize::{normalize_address, normalize_address_str};
use crate::records::{BlockInfo, DecodedEvent, SaveReceipt};
use crate::types::RawLog;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Persists decoded events for one or more watched contracts.
#[async_trait]
pub trait EventReceiver: Send + Sync {
    /// Apply an event. `None` means the receiver chose not to persist it,
    /// so there is nothing to roll back later.
    async fn save(
        &self,
        event: &DecodedEvent,
        block: &BlockInfo,
    ) -> anyhow::Result<Option<SaveReceipt>>;

    /// Undo a previously saved event.
    async fn rollback(&self, event: &DecodedEvent, block: &BlockInfo) -> anyhow::Result<()>;
}

/// Resolves a dynamic watched address set.
#[async_trait]
pub trait AddressesGetter: Send + Sync {
    async fn get_addresses(&self) -> anyhow::Result<Vec<String>>;

    /// Whether `address` is currently watched.
    async fn contains(&self, address: &str) -> anyhow::Result<bool> {
        let wanted = normalize_address_str(address)?;
        for candidate in self.get_addresses().await? {
            if normalize_address_str(&candidate)? == wanted {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Receivers and address getters by identifier.
#[derive(Default)]
pub struct CapabilityRegistry {
    receivers: HashMap<String, Arc<dyn EventReceiver>>,
    getters: HashMap<String, Arc<dyn AddressesGetter>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a receiver under `id`, replacing any previous one.
    pub fn register_receiver(&mut self, id: impl Into<String>, receiver: Arc<dyn EventReceiver>) {
        self.receivers.insert(id.into(), receiver);
    }

    /// Register an address getter under `id`, replacing any previous one.
    pub fn register_addresses_getter(
        &mut self,
        id: impl Into<String>,
        getter: Arc<dyn AddressesGetter>,
    ) {
        self.getters.insert(id.into(), getter);
    }
}

enum AddressSource {
    Static(HashSet<String>),
    Getter {
        id: String,
        getter: Arc<dyn AddressesGetter>,
    },
}

/// A configured contract with its resolved capabilities.
pub struct WatchedContract {
    name: String,
    receiver_id: String,
    receiver: Arc<dyn EventReceiver>,
    decoder: LogDecoder,
    event_method_ids: Vec<String>,
    addresses: AddressSource,
}

impl WatchedContract {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn receiver_id(&self) -> &str {
        &self.receiver_id
    }

    pub fn decoder(&self) -> &LogDecoder {
        &self.decoder
    }

    /// True when the watched addresses come from an `AddressesGetter` and
    /// can change while a range is processed.
    pub fn has_dynamic_addresses(&self) -> bool {
        matches!(self.addresses, AddressSource::Getter { .. })
    }

    /// Method ids of the contract's events, for `eth_getLogs` topic filters.
    pub fn event_method_ids(&self) -> &[String] {
        &self.event_method_ids
    }
}

/// Routes decoded events to receivers.
pub struct EventDispatcher {
    contracts: Vec<WatchedContract>,
    receivers: HashMap<String, Arc<dyn EventReceiver>>,
    cache: Mutex<AddressCache>,
}

impl EventDispatcher {
    /// Resolve every contract configuration against the registry.
    ///
    /// Fails on duplicate contract names, unknown identifiers, malformed
    /// static addresses and ABIs the decoder cannot parse.
    pub fn new(contracts: &[ContractConfig], registry: &CapabilityRegistry) -> Result<Self, IngestError> {
        let mut names = HashSet::new();
        let mut watched = Vec::with_capacity(contracts.len());
        let mut receivers = HashMap::new();

        for config in contracts {
            if !names.insert(config.name.clone()) {
                return Err(IngestError::Config(format!(
                    "duplicate contract name '{}'",
                    config.name
                )));
            }

            let receiver = registry.receivers.get(&config.receiver).cloned().ok_or_else(|| {
                IngestError::Config(format!(
                    "contract '{}': unknown receiver '{}'",
                    config.name, config.receiver
                ))
            })?;
            receivers.insert(config.receiver.clone(), receiver.clone());

            let addresses = match (&config.addresses, &config.addresses_getter) {
                (Some(addresses), None) => AddressSource::Static(
                    addresses
                        .iter()
                        .map(|a| normalize_address_str(a))
                        .collect::<Result<HashSet<_>, _>>()
                        .map_err(|e| IngestError::Config(format!("contract '{}': {}", config.name, e)))?,
                ),
                (None, Some(id)) => AddressSource::Getter {
                    id: id.clone(),
                    getter: registry.getters.get(id).cloned().ok_or_else(|| {
                        IngestError::Config(format!(
                            "contract '{}': unknown addresses getter '{}'",
                            config.name, id
                        ))
                    })?,
                },
                _ => {
                    return Err(IngestError::Config(format!(
                        "contract '{}' needs exactly one of 'addresses' or 'addresses_getter'",
                        config.name
                    )))
                }
            };

            let abi_error =
                |e: DecodeError| IngestError::Config(format!("contract '{}': {}", config.name, e));
            let decoder = LogDecoder::from_abi(&config.event_abi).map_err(abi_error)?;
            let mut event_method_ids = Vec::new();
            for descriptor in config.event_abi.iter().filter(|d| d.is_event()) {
                if let Some(id) = descriptor.method_id().map_err(abi_error)? {
                    event_method_ids.push(id);
                }
            }

            watched.push(WatchedContract {
                name: config.name.clone(),
                receiver_id: config.receiver.clone(),
                receiver,
                decoder,
                event_method_ids,
                addresses,
            });
        }

        Ok(Self {
            contracts: watched,
            receivers,
            cache: Mutex::new(AddressCache::new()),
        })
    }

    pub fn contracts(&self) -> &[WatchedContract] {
        &self.contracts
    }

    /// Current watched address set of a contract.
    ///
    /// Getter results are cached until the next non-empty save.
    pub async fn watched_addresses(
        &self,
        contract: &WatchedContract,
    ) -> Result<HashSet<String>, IngestError> {
        let (id, getter) = match &contract.addresses {
            AddressSource::Static(addresses) => return Ok(addresses.clone()),
            AddressSource::Getter { id, getter } => (id, getter),
        };

        let mut cache = self.cache.lock().await;
        if let Some(addresses) = cache.get(&contract.name) {
            return Ok(addresses.clone());
        }

        let lookup_error = |source: anyhow::Error| IngestError::AddressLookup {
            contract: contract.name.clone(),
            source,
        };
        let raw = getter.get_addresses().await.map_err(lookup_error)?;
        let addresses = raw
            .iter()
            .map(|a| normalize_address_str(a))
            .collect::<Result<HashSet<_>, _>>()
            .map_err(|e| lookup_error(anyhow::Error::new(e)))?;
        debug!(contract = %contract.name, getter = %id, count = addresses.len(), "Resolved watched addresses");
        cache.insert(&contract.name, addresses.clone());
        Ok(addresses)
    }

    /// Logs emitted by one of the contract's watched addresses, in order.
    ///
    /// Logs flagged `removed` by the node are skipped.
    pub async fn matching_logs<'a>(
        &self,
        contract: &WatchedContract,
        logs: &'a [RawLog],
    ) -> Result<Vec<&'a RawLog>, IngestError> {
        let addresses = self.watched_addresses(contract).await?;
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let mut matching = Vec::new();
        for log in logs.iter().filter(|log| !log.removed) {
            if addresses.contains(&normalize_address(log.address.as_ref())?) {
                matching.push(log);
            }
        }
        Ok(matching)
    }

    /// Hand an event to the contract's receiver.
    pub async fn save(
        &self,
        contract: &WatchedContract,
        event: &DecodedEvent,
        block: &BlockInfo,
    ) -> Result<Option<SaveReceipt>, IngestError> {
        let receipt = contract
            .receiver
            .save(event, block)
            .await
            .map_err(|source| IngestError::Receiver {
                receiver: contract.receiver_id.clone(),
                source,
            })?;
        if receipt.is_some() {
            self.invalidate_addresses().await;
        }
        Ok(receipt)
    }

    /// Undo an event through the receiver that saved it.
    pub async fn rollback(
        &self,
        receiver_id: &str,
        event: &DecodedEvent,
        block: &BlockInfo,
    ) -> Result<(), IngestError> {
        let receiver = self.receivers.get(receiver_id).ok_or_else(|| {
            IngestError::Config(format!("no receiver '{}' to roll back with", receiver_id))
        })?;
        receiver
            .rollback(event, block)
            .await
            .map_err(|source| IngestError::Receiver {
                receiver: receiver_id.to_string(),
                source,
            })
    }

    /// Drop every cached address set.
    pub async fn invalidate_addresses(&self) {
        self.cache.lock().await.invalidate_all();
    }
}
