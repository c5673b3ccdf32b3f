//! In-memory DLQ store for single-process runs and tests.
//!
//! One lock covers the whole table, which makes `claim_due` atomic.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::state::DlqStatus;
use super::store::DlqStore;
use super::types::{DlqConfig, DlqEntry, DlqError, DlqFilter, DlqStats, NewDlqEntry};
use crate::core_types::DlqEntryId;

pub struct InMemoryDlqStore {
    entries: Mutex<HashMap<DlqEntryId, DlqEntry>>,
    config: DlqConfig,
}

impl InMemoryDlqStore {
    pub fn new(config: DlqConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<DlqEntryId, DlqEntry>>, DlqError> {
        self.entries
            .lock()
            .map_err(|_| DlqError::Storage("dlq lock poisoned".into()))
    }

    fn update<F>(&self, id: &DlqEntryId, f: F) -> Result<DlqEntry, DlqError>
    where
        F: FnOnce(&mut DlqEntry) -> Result<(), DlqError>,
    {
        let mut entries = self.lock()?;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| DlqError::NotFound(id.to_string()))?;
        // Apply on a copy so a rejected transition leaves the row untouched
        let mut next = entry.clone();
        f(&mut next)?;
        *entry = next.clone();
        Ok(next)
    }

    fn due(entries: &HashMap<DlqEntryId, DlqEntry>, limit: usize) -> Vec<DlqEntryId> {
        let now = Utc::now();
        let mut due: Vec<&DlqEntry> = entries.values().filter(|e| e.is_due(now)).collect();
        due.sort_by_key(|e| (e.next_retry_at, e.id));
        due.into_iter().take(limit).map(|e| e.id).collect()
    }
}

#[async_trait]
impl DlqStore for InMemoryDlqStore {
    async fn add(&self, entry: NewDlqEntry) -> Result<DlqEntry, DlqError> {
        let entry = DlqEntry::new(entry, &self.config, Utc::now());
        self.lock()?.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get(&self, id: &DlqEntryId) -> Result<DlqEntry, DlqError> {
        self.lock()?
            .get(id)
            .cloned()
            .ok_or_else(|| DlqError::NotFound(id.to_string()))
    }

    async fn list(&self, filter: &DlqFilter) -> Result<Vec<DlqEntry>, DlqError> {
        let entries = self.lock()?;
        let mut matched: Vec<DlqEntry> = entries
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.first_failed_at.cmp(&a.first_failed_at).then(b.id.cmp(&a.id)));
        matched.truncate(filter.limit());
        Ok(matched)
    }

    async fn get_pending_retries(&self, limit: usize) -> Result<Vec<DlqEntry>, DlqError> {
        let entries = self.lock()?;
        Ok(Self::due(&entries, limit)
            .iter()
            .filter_map(|id| entries.get(id).cloned())
            .collect())
    }

    async fn mark_retrying(&self, id: &DlqEntryId) -> Result<bool, DlqError> {
        match self.update(id, |e| e.mark_retrying()) {
            Ok(_) => Ok(true),
            Err(DlqError::InvalidTransition { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn claim_due(&self, limit: usize) -> Result<Vec<DlqEntry>, DlqError> {
        let mut entries = self.lock()?;
        let mut claimed = Vec::new();
        for id in Self::due(&entries, limit) {
            if let Some(entry) = entries.get_mut(&id)
                && entry.mark_retrying().is_ok()
            {
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }

    async fn record_success(&self, id: &DlqEntryId) -> Result<DlqEntry, DlqError> {
        self.update(id, |e| e.record_success(Utc::now()))
    }

    async fn record_failure(
        &self,
        id: &DlqEntryId,
        reason: &str,
        status_code: Option<u16>,
    ) -> Result<DlqEntry, DlqError> {
        let schedule = &self.config.schedule;
        self.update(id, |e| e.record_failure(reason, status_code, schedule, Utc::now()))
    }

    async fn abandon(&self, id: &DlqEntryId) -> Result<DlqEntry, DlqError> {
        self.update(id, |e| e.abandon())
    }

    async fn replay(&self, id: &DlqEntryId) -> Result<DlqEntry, DlqError> {
        let ttl = self.config.ttl;
        self.update(id, |e| {
            e.replay(ttl, Utc::now());
            Ok(())
        })
    }

    async fn cleanup_expired(&self) -> Result<u64, DlqError> {
        let now = Utc::now();
        let mut entries = self.lock()?;
        Ok(entries
            .values_mut()
            .map(|e| e.expire_if_due(now))
            .filter(|moved| *moved)
            .count() as u64)
    }

    async fn stats(&self) -> Result<DlqStats, DlqError> {
        let entries = self.lock()?;
        let mut stats = DlqStats::default();
        for entry in entries.values() {
            stats.add(entry.status, 1);
        }
        Ok(stats)
    }
}
