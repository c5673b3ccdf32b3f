use async_trait::async_trait;

use super::types::{DlqEntry, DlqError, DlqFilter, DlqStats, NewDlqEntry};
use crate::core_types::DlqEntryId;

/// Durable retry scheduling for exhausted deliveries.
///
/// `mark_retrying` is an advisory single-row claim; `claim_due` is the
/// atomic batch claim sweepers should use when more than one instance runs.
#[async_trait]
pub trait DlqStore: Send + Sync {
    async fn add(&self, entry: NewDlqEntry) -> Result<DlqEntry, DlqError>;

    async fn get(&self, id: &DlqEntryId) -> Result<DlqEntry, DlqError>;

    async fn list(&self, filter: &DlqFilter) -> Result<Vec<DlqEntry>, DlqError>;

    /// Due pending entries ordered by `next_retry_at`
    async fn get_pending_retries(&self, limit: usize) -> Result<Vec<DlqEntry>, DlqError>;

    /// `pending -> retrying`; false when the entry was not pending
    async fn mark_retrying(&self, id: &DlqEntryId) -> Result<bool, DlqError>;

    /// Select due entries and flip them to `retrying` in one step
    async fn claim_due(&self, limit: usize) -> Result<Vec<DlqEntry>, DlqError>;

    async fn record_success(&self, id: &DlqEntryId) -> Result<DlqEntry, DlqError>;

    async fn record_failure(
        &self,
        id: &DlqEntryId,
        reason: &str,
        status_code: Option<u16>,
    ) -> Result<DlqEntry, DlqError>;

    async fn abandon(&self, id: &DlqEntryId) -> Result<DlqEntry, DlqError>;

    async fn replay(&self, id: &DlqEntryId) -> Result<DlqEntry, DlqError>;

    /// Expire pending entries past their deadline; returns how many moved
    async fn cleanup_expired(&self) -> Result<u64, DlqError>;

    async fn stats(&self) -> Result<DlqStats, DlqError>;
}
