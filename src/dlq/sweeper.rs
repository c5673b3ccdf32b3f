//! DLQ sweeper
//!
//! Periodically expires stale entries, claims due ones and re-attempts
//! each delivery once. The outcome feeds back into the entry's schedule.

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::state::DlqStatus;
use super::store::DlqStore;
use super::types::{DlqConfig, DlqEntry, DlqError};
use crate::delivery::signing::refresh_timestamp;
use crate::delivery::{AttemptOutcome, DeliveryWorker, sent_key};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: u64,
    pub claimed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failures that used up the last attempt
    pub exhausted: usize,
}

pub struct DlqSweeper {
    store: Arc<dyn DlqStore>,
    worker: Arc<DeliveryWorker>,
    config: DlqConfig,
}

impl DlqSweeper {
    pub fn new(store: Arc<dyn DlqStore>, worker: Arc<DeliveryWorker>, config: DlqConfig) -> Self {
        Self {
            store,
            worker,
            config,
        }
    }

    pub async fn sweep_once(&self, cancel: &CancellationToken) -> Result<SweepReport, DlqError> {
        let mut report = SweepReport {
            expired: self.store.cleanup_expired().await?,
            ..Default::default()
        };
        if report.expired > 0 {
            info!(expired = report.expired, "DLQ entries expired");
        }

        let claimed = self.store.claim_due(self.config.batch_size).await?;
        report.claimed = claimed.len();

        let mut remaining = claimed.into_iter();
        while let Some(entry) = remaining.next() {
            if cancel.is_cancelled() {
                self.release(std::iter::once(entry).chain(remaining.by_ref()))
                    .await;
                break;
            }
            self.retry_entry(entry, cancel, &mut report).await?;
        }

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                succeeded = report.succeeded,
                failed = report.failed,
                exhausted = report.exhausted,
                "DLQ sweep finished"
            );
        }
        Ok(report)
    }

    /// Hand unattempted claims back as due. One failed hand-back does not
    /// strand the rest in `retrying`.
    async fn release(&self, entries: impl Iterator<Item = DlqEntry>) {
        for entry in entries {
            if let Err(e) = self.store.replay(&entry.id).await {
                error!(entry_id = %entry.id, error = %e, "Failed to release claimed DLQ entry");
            }
        }
    }

    async fn retry_entry(
        &self,
        entry: DlqEntry,
        cancel: &CancellationToken,
        report: &mut SweepReport,
    ) -> Result<(), DlqError> {
        let key = sent_key(&entry.task_id);
        let dedup = self.worker.dedup();

        match dedup.is_sent(&key).await {
            Ok(true) => {
                debug!(entry_id = %entry.id, task_id = %entry.task_id, "Already delivered, closing entry");
                self.store.record_success(&entry.id).await?;
                report.succeeded += 1;
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => warn!(entry_id = %entry.id, error = %e, "Dedup lookup failed, attempting anyway"),
        }

        let mut headers = entry.headers.clone();
        refresh_timestamp(&mut headers, Utc::now());

        let Some(outcome) = self
            .worker
            .attempt(&entry.url, &headers, &entry.payload, cancel)
            .await
        else {
            self.release(std::iter::once(entry)).await;
            return Ok(());
        };

        match outcome {
            AttemptOutcome::Delivered(status) => {
                self.store.record_success(&entry.id).await?;
                if let Err(e) = dedup
                    .mark_sent(&key, self.worker.config().webhook_dedup_ttl)
                    .await
                {
                    warn!(entry_id = %entry.id, error = %e, "Failed to record dedup key");
                }
                info!(entry_id = %entry.id, task_id = %entry.task_id, status, "DLQ redelivery succeeded");
                report.succeeded += 1;
            }
            AttemptOutcome::Rejected(status) => {
                let reason = format!("rejected with status {}", status);
                self.record_failure(&entry, &reason, Some(status), report)
                    .await?;
            }
            AttemptOutcome::Retryable { status, error } => {
                self.record_failure(&entry, &error, status, report).await?;
            }
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        entry: &DlqEntry,
        reason: &str,
        status: Option<u16>,
        report: &mut SweepReport,
    ) -> Result<(), DlqError> {
        let updated = self.store.record_failure(&entry.id, reason, status).await?;
        report.failed += 1;
        if updated.status == DlqStatus::Exhausted {
            report.exhausted += 1;
            warn!(
                entry_id = %updated.id,
                task_id = %updated.task_id,
                attempts = updated.attempt_count,
                reason,
                "DLQ entry exhausted"
            );
        } else {
            debug!(
                entry_id = %updated.id,
                attempts = updated.attempt_count,
                next_retry_at = ?updated.next_retry_at,
                "DLQ redelivery failed"
            );
        }
        Ok(())
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            sweep_interval_ms = self.config.sweep_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Starting DLQ sweeper"
        );

        loop {
            if let Err(e) = self.sweep_once(&cancel).await {
                error!(error = %e, "DLQ sweep failed");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.sweep_interval) => {}
            }
        }

        info!("DLQ sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::dedup::{DedupStore, InMemoryDedupStore};
    use crate::delivery::signing::TIMESTAMP_HEADER;
    use crate::delivery::transport::mock::ScriptedTransport;
    use crate::delivery::DeliveryConfig;
    use crate::dlq::memory::InMemoryDlqStore;
    use crate::dlq::types::NewDlqEntry;
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryDlqStore>,
        transport: Arc<ScriptedTransport>,
        dedup: Arc<InMemoryDedupStore>,
        sweeper: DlqSweeper,
    }

    fn fixture(transport: ScriptedTransport, config: DlqConfig) -> Fixture {
        let store = Arc::new(InMemoryDlqStore::new(config.clone()));
        let transport = Arc::new(transport);
        let dedup = Arc::new(InMemoryDedupStore::new());
        let worker = Arc::new(DeliveryWorker::new(
            transport.clone(),
            dedup.clone(),
            DeliveryConfig::default(),
        ));
        let sweeper = DlqSweeper::new(store.clone(), worker, config);
        Fixture {
            store,
            transport,
            dedup,
            sweeper,
        }
    }

    fn new_entry(task: &str) -> NewDlqEntry {
        NewDlqEntry {
            task_id: task.into(),
            zone_id: "zone_a".into(),
            url: "http://hooks.test/a".into(),
            payload: br#"{"id":"evt_1"}"#.to_vec(),
            headers: vec![
                ("x-payrail-signature".into(), "abc".into()),
                (TIMESTAMP_HEADER.into(), "2020-01-01T00:00:00Z".into()),
            ],
            failure_reason: "unexpected status 500".into(),
            last_status_code: Some(500),
        }
    }

    async fn due_entry(store: &InMemoryDlqStore, task: &str) -> DlqEntry {
        let entry = store.add(new_entry(task)).await.unwrap();
        store.replay(&entry.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_not_yet_due_entries_are_left_alone() {
        let f = fixture(ScriptedTransport::always(200), DlqConfig::default());
        f.store.add(new_entry("t1")).await.unwrap();

        let report = f.sweeper.sweep_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.claimed, 0);
        assert_eq!(f.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_successful_redelivery_closes_entry_and_marks_sent() {
        let f = fixture(ScriptedTransport::always(200), DlqConfig::default());
        let entry = due_entry(&f.store, "t1").await;

        let report = f.sweeper.sweep_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(f.store.get(&entry.id).await.unwrap().status, DlqStatus::Succeeded);
        assert!(f.dedup.is_sent(&sent_key("t1")).await.unwrap());

        let call = &f.transport.calls()[0];
        assert_eq!(call.header("x-payrail-signature"), Some("abc"));
        assert_ne!(call.header(TIMESTAMP_HEADER), Some("2020-01-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn test_failed_redelivery_reschedules() {
        let f = fixture(ScriptedTransport::always(503), DlqConfig::default());
        let entry = due_entry(&f.store, "t1").await;
        let before = Utc::now();

        let report = f.sweeper.sweep_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.exhausted, 0);

        let entry = f.store.get(&entry.id).await.unwrap();
        assert_eq!(entry.status, DlqStatus::Pending);
        assert_eq!(entry.attempt_count, 2);
        assert_eq!(entry.last_status_code, Some(503));
        assert!(entry.next_retry_at.unwrap() >= before + chrono::Duration::minutes(5));
    }

    #[tokio::test]
    async fn test_last_attempt_exhausts() {
        let config = DlqConfig {
            max_attempts: 2,
            ..DlqConfig::default()
        };
        let f = fixture(ScriptedTransport::always(500), config);
        let entry = due_entry(&f.store, "t1").await;

        let report = f.sweeper.sweep_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.exhausted, 1);
        let entry = f.store.get(&entry.id).await.unwrap();
        assert_eq!(entry.status, DlqStatus::Exhausted);
        assert!(entry.next_retry_at.is_none());
    }

    #[tokio::test]
    async fn test_already_delivered_skips_network() {
        let f = fixture(ScriptedTransport::always(500), DlqConfig::default());
        let entry = due_entry(&f.store, "t1").await;
        f.dedup
            .mark_sent(&sent_key("t1"), Duration::from_secs(60))
            .await
            .unwrap();

        let report = f.sweeper.sweep_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(f.transport.call_count(), 0);
        assert_eq!(f.store.get(&entry.id).await.unwrap().status, DlqStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_cancelled_sweep_returns_claims() {
        let f = fixture(ScriptedTransport::always(200), DlqConfig::default());
        let a = due_entry(&f.store, "a").await;
        let b = due_entry(&f.store, "b").await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = f.sweeper.sweep_once(&cancel).await.unwrap();
        assert_eq!(report.claimed, 2);
        assert_eq!(f.transport.call_count(), 0);
        for id in [a.id, b.id] {
            let entry = f.store.get(&id).await.unwrap();
            assert_eq!(entry.status, DlqStatus::Pending);
            assert_eq!(entry.attempt_count, 1);
        }
    }

    /// Delegates to memory but refuses to hand back one entry
    struct StickyReplayStore {
        inner: Arc<InMemoryDlqStore>,
        stuck: std::sync::Mutex<Option<crate::core_types::DlqEntryId>>,
    }

    #[async_trait::async_trait]
    impl DlqStore for StickyReplayStore {
        async fn add(&self, entry: NewDlqEntry) -> Result<DlqEntry, DlqError> {
            self.inner.add(entry).await
        }
        async fn get(&self, id: &crate::core_types::DlqEntryId) -> Result<DlqEntry, DlqError> {
            self.inner.get(id).await
        }
        async fn list(&self, filter: &crate::dlq::DlqFilter) -> Result<Vec<DlqEntry>, DlqError> {
            self.inner.list(filter).await
        }
        async fn get_pending_retries(&self, limit: usize) -> Result<Vec<DlqEntry>, DlqError> {
            self.inner.get_pending_retries(limit).await
        }
        async fn mark_retrying(&self, id: &crate::core_types::DlqEntryId) -> Result<bool, DlqError> {
            self.inner.mark_retrying(id).await
        }
        async fn claim_due(&self, limit: usize) -> Result<Vec<DlqEntry>, DlqError> {
            self.inner.claim_due(limit).await
        }
        async fn record_success(
            &self,
            id: &crate::core_types::DlqEntryId,
        ) -> Result<DlqEntry, DlqError> {
            self.inner.record_success(id).await
        }
        async fn record_failure(
            &self,
            id: &crate::core_types::DlqEntryId,
            reason: &str,
            status_code: Option<u16>,
        ) -> Result<DlqEntry, DlqError> {
            self.inner.record_failure(id, reason, status_code).await
        }
        async fn abandon(&self, id: &crate::core_types::DlqEntryId) -> Result<DlqEntry, DlqError> {
            self.inner.abandon(id).await
        }
        async fn replay(&self, id: &crate::core_types::DlqEntryId) -> Result<DlqEntry, DlqError> {
            if self.stuck.lock().unwrap().as_ref() == Some(id) {
                return Err(DlqError::Storage("connection reset".into()));
            }
            self.inner.replay(id).await
        }
        async fn cleanup_expired(&self) -> Result<u64, DlqError> {
            self.inner.cleanup_expired().await
        }
        async fn stats(&self) -> Result<crate::dlq::DlqStats, DlqError> {
            self.inner.stats().await
        }
    }

    #[tokio::test]
    async fn test_failed_hand_back_does_not_strand_other_claims() {
        let inner = Arc::new(InMemoryDlqStore::new(DlqConfig::default()));
        let entries = [
            due_entry(&inner, "a").await,
            due_entry(&inner, "b").await,
            due_entry(&inner, "c").await,
        ];
        // Claims come back in due order, so fail the first hand-back
        let claimed_first = inner.get_pending_retries(1).await.unwrap()[0].id.clone();
        let store = Arc::new(StickyReplayStore {
            inner: inner.clone(),
            stuck: std::sync::Mutex::new(Some(claimed_first.clone())),
        });
        let worker = Arc::new(DeliveryWorker::new(
            Arc::new(ScriptedTransport::always(200)),
            Arc::new(InMemoryDedupStore::new()),
            DeliveryConfig::default(),
        ));
        let sweeper = DlqSweeper::new(store, worker, DlqConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = sweeper.sweep_once(&cancel).await.unwrap();
        assert_eq!(report.claimed, 3);

        for entry in &entries {
            let status = inner.get(&entry.id).await.unwrap().status;
            if entry.id == claimed_first {
                assert_eq!(status, DlqStatus::Retrying);
            } else {
                assert_eq!(status, DlqStatus::Pending);
            }
        }
    }

    #[tokio::test]
    async fn test_expired_entries_are_swept() {
        let config = DlqConfig {
            ttl: Duration::ZERO,
            ..DlqConfig::default()
        };
        let f = fixture(ScriptedTransport::always(200), config);
        f.store.add(new_entry("t1")).await.unwrap();

        let report = f.sweeper.sweep_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.claimed, 0);
    }
}
