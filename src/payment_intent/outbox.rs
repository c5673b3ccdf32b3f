//! Ledger outbox dispatcher
//!
//! Drains legs written alongside the `succeeded` transition. Each leg
//! carries its own reference id, so a replay after a crash is
//! deduplicated by the ledger. A failing leg stays in the outbox with
//! its attempt count bumped; the payment itself is never touched.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::adapters::LedgerService;
use super::error::PaymentError;
use super::repository::LedgerOutboxStore;

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub dispatched: usize,
    pub failed: usize,
}

pub struct OutboxDispatcher {
    outbox: Arc<dyn LedgerOutboxStore>,
    ledger: Arc<dyn LedgerService>,
    config: OutboxConfig,
}

impl OutboxDispatcher {
    pub fn new(
        outbox: Arc<dyn LedgerOutboxStore>,
        ledger: Arc<dyn LedgerService>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            outbox,
            ledger,
            config,
        }
    }

    /// Post one batch of undispatched legs
    pub async fn drain_once(&self) -> Result<DrainReport, PaymentError> {
        let records = self.outbox.fetch_undispatched(self.config.batch_size).await?;
        if records.is_empty() {
            return Ok(DrainReport::default());
        }

        let mut report = DrainReport::default();
        for record in records {
            match self.ledger.record_transaction(&record.leg).await {
                Ok(receipt) => {
                    self.outbox
                        .mark_dispatched(record.id, &receipt.transaction_id)
                        .await?;
                    debug!(
                        outbox_id = record.id,
                        reference_id = %record.leg.reference_id,
                        transaction_id = %receipt.transaction_id,
                        "Outbox leg dispatched"
                    );
                    report.dispatched += 1;
                }
                Err(e) => {
                    warn!(
                        outbox_id = record.id,
                        payment_id = %record.payment_intent_id,
                        reference_id = %record.leg.reference_id,
                        attempts = record.attempts + 1,
                        error = %e,
                        "Outbox leg dispatch failed"
                    );
                    self.outbox
                        .record_attempt_failure(record.id, &e.to_string())
                        .await?;
                    report.failed += 1;
                }
            }
        }

        if report.dispatched > 0 {
            info!(dispatched = report.dispatched, failed = report.failed, "Outbox drained");
        }
        Ok(report)
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Starting ledger outbox dispatcher"
        );

        loop {
            if let Err(e) = self.drain_once().await {
                error!(error = %e, "Outbox drain failed");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!("Ledger outbox dispatcher stopped");
    }
}
