//! Scheduler-facing wrapper around the ingestion engine
//!
//! Each `run_once` call is one scheduled invocation: skip if halted, take
//! the persisted lock, run a pass, always release the lock, and turn
//! unrecoverable errors into a HALTED state plus one alert per error block.

use crate::alert::Alerter;
use crate::engine::{IngestionEngine, PassReport};
use crate::error::IngestError;
use crate::records::LockAcquisition;
use crate::rpc::ChainClient;
use crate::store::{now_secs, EventStore};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of one scheduled invocation.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(PassReport),
    /// Another worker holds the lock; nothing was done.
    LockHeld,
    /// The daemon is halted; nothing was done.
    Halted,
    /// The pass failed. `halted` is false for recoverable errors that will
    /// be retried on the next invocation.
    Failed { error: IngestError, halted: bool },
}

impl RunOutcome {
    pub fn is_halted(&self) -> bool {
        matches!(self, Self::Halted | Self::Failed { halted: true, .. })
    }
}

/// Releases the ingestion lock when dropped.
struct LockGuard<'a, S: EventStore> {
    store: &'a S,
}

impl<S: EventStore> Drop for LockGuard<'_, S> {
    fn drop(&mut self) {
        if let Err(e) = self.store.release_lock() {
            error!("Failed to release ingestion lock: {:#}", e);
        }
    }
}

pub struct Daemon<C, S> {
    engine: IngestionEngine<C, S>,
    alerter: Arc<dyn Alerter>,
    lock_stale_after_secs: i64,
}

impl<C: ChainClient, S: EventStore> Daemon<C, S> {
    pub fn new(
        engine: IngestionEngine<C, S>,
        alerter: Arc<dyn Alerter>,
        lock_stale_after_secs: u64,
    ) -> Self {
        Self {
            engine,
            alerter,
            lock_stale_after_secs: i64::try_from(lock_stale_after_secs).unwrap_or(i64::MAX),
        }
    }

    pub fn engine(&self) -> &IngestionEngine<C, S> {
        &self.engine
    }

    /// Run one ingestion pass if the daemon is executing and the lock is free.
    ///
    /// Only storage failures while reading the state or taking the lock are
    /// returned as `Err`; pass failures are reported in `RunOutcome::Failed`.
    pub async fn run_once(&self) -> Result<RunOutcome, IngestError> {
        let store = self.engine.store().as_ref();

        match store.try_acquire_lock().map_err(IngestError::Storage)? {
            LockAcquisition::Acquired => {}
            LockAcquisition::Halted => {
                debug!("Daemon halted, skipping pass");
                return Ok(RunOutcome::Halted);
            }
            LockAcquisition::Held => {
                info!("Ingestion lock held by another worker, skipping pass");
                return Ok(RunOutcome::LockHeld);
            }
        }
        let _guard = LockGuard { store };

        match self.engine.pass().await {
            Ok(report) => Ok(RunOutcome::Completed(report)),
            Err(error) if error.is_recoverable() => {
                warn!("Pass aborted, will retry: {}", error);
                Ok(RunOutcome::Failed {
                    error,
                    halted: false,
                })
            }
            Err(error) => {
                self.halt(&error).await?;
                Ok(RunOutcome::Failed {
                    error,
                    halted: true,
                })
            }
        }
    }

    /// Halt and alert unless this error block was already alerted.
    async fn halt(&self, error: &IngestError) -> Result<(), IngestError> {
        let store = self.engine.store();
        let should_alert = store.record_error().map_err(IngestError::Storage)?;
        let block = store.state().map_err(IngestError::Storage)?.last_error_block;
        error!(block, "Daemon halted: {}", error);

        if !should_alert {
            debug!(block, "Error already alerted for this block");
            return Ok(());
        }
        let subject = format!("logtail halted at block {}", block);
        let mut body = format!("Ingestion halted after block {}: {}", block, error);
        if error.needs_resync() {
            body.push_str("\nThe reorg is deeper than the backup window; run `logtailctl resync`.");
        } else {
            body.push_str("\nFix the cause and run `logtailctl resume`.");
        }
        if let Err(e) = self.alerter.alert(&subject, &body).await {
            error!("Failed to send alert: {:#}", e);
        }
        Ok(())
    }

    /// Clear a lock left behind by a worker that died mid-pass.
    pub fn recover_stale_lock(&self) -> Result<bool, IngestError> {
        let cleared = self
            .engine
            .store()
            .clear_stale_lock(now_secs(), self.lock_stale_after_secs)
            .map_err(IngestError::Storage)?;
        if cleared {
            warn!(
                stale_after_secs = self.lock_stale_after_secs,
                "Cleared stale ingestion lock"
            );
        }
        Ok(cleared)
    }
}
