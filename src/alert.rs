//! Operator alerts for halting errors.

use async_trait::async_trait;
use tracing::error;

/// Delivers an alert to an operator.
#[async_trait]
pub trait Alerter: Send + Sync {
    async fn alert(&self, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Alerter that writes alerts to the log at `error` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlerter;

#[async_trait]
impl Alerter for LogAlerter {
    async fn alert(&self, subject: &str, body: &str) -> anyhow::Result<()> {
        error!(subject, body, "ALERT");
        Ok(())
    }
}
