//! Built-in receivers.

use crate::dispatcher::EventReceiver;
use crate::records::{BlockInfo, DecodedEvent, SaveReceipt};
use async_trait::async_trait;
use tracing::info;

/// Receiver that writes every event to the log as JSON.
///
/// Registered by `logtaild` as `"log"`, so a configuration can run without
/// custom receivers.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReceiver;

#[async_trait]
impl EventReceiver for LogReceiver {
    async fn save(
        &self,
        event: &DecodedEvent,
        block: &BlockInfo,
    ) -> anyhow::Result<Option<SaveReceipt>> {
        let params = serde_json::to_string(&event.params)?;
        info!(
            block = block.number,
            contract = %event.contract_address,
            event = %event.event_name,
            tx = %event.transaction_hash,
            params = %params,
            "Event"
        );
        Ok(Some(SaveReceipt::new(format!(
            "{}:{}",
            event.transaction_hash, event.event_name
        ))))
    }

    async fn rollback(&self, event: &DecodedEvent, block: &BlockInfo) -> anyhow::Result<()> {
        info!(
            block = block.number,
            contract = %event.contract_address,
            event = %event.event_name,
            tx = %event.transaction_hash,
            "Rolled back event"
        );
        Ok(())
    }
}
