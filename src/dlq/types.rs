//! DLQ entry, configuration and errors.
//!
//! Transitions are pure methods on [`DlqEntry`] taking `now`, shared by
//! the in-memory and PostgreSQL stores. They keep two invariants:
//! `next_retry_at` is set exactly when the status is `pending`, and
//! `attempt_count` never decreases.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::time::Duration;
use thiserror::Error;

use super::schedule::RetrySchedule;
use super::state::DlqStatus;
use crate::core_types::{DlqEntryId, ZoneId};
use crate::error::ErrorClass;

#[derive(Debug, Clone)]
pub struct DlqConfig {
    pub max_attempts: u32,
    pub ttl: Duration,
    pub schedule: RetrySchedule,
    pub sweep_interval: Duration,
    pub batch_size: usize,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            ttl: Duration::from_secs(7 * 24 * 3600),
            schedule: RetrySchedule::default(),
            sweep_interval: Duration::from_secs(30),
            batch_size: 50,
        }
    }
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DlqError {
    #[error("DLQ entry not found: {0}")]
    NotFound(String),

    #[error("DLQ entry {id} cannot {action} from status {from}")]
    InvalidTransition {
        id: String,
        from: DlqStatus,
        action: &'static str,
    },

    #[error("DLQ storage error: {0}")]
    Storage(String),
}

impl DlqError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DlqError::NotFound(_) => ErrorClass::NotFound,
            DlqError::InvalidTransition { .. } => ErrorClass::AlreadyProcessed,
            DlqError::Storage(_) => ErrorClass::TransientInfra,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            DlqError::NotFound(_) => "DLQ_ENTRY_NOT_FOUND",
            DlqError::InvalidTransition { .. } => "DLQ_INVALID_TRANSITION",
            DlqError::Storage(_) => "DLQ_STORAGE_ERROR",
        }
    }
}

impl From<sqlx::Error> for DlqError {
    fn from(e: sqlx::Error) -> Self {
        DlqError::Storage(e.to_string())
    }
}

/// A delivery that exhausted the worker's in-process retries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDlqEntry {
    pub task_id: String,
    pub zone_id: ZoneId,
    pub url: String,
    pub payload: Vec<u8>,
    /// Signed headers of the failed delivery
    pub headers: Vec<(String, String)>,
    pub failure_reason: String,
    pub last_status_code: Option<u16>,
}

fn payload_as_text<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(payload))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DlqEntry {
    pub id: DlqEntryId,
    pub task_id: String,
    pub zone_id: ZoneId,
    pub url: String,
    #[serde(serialize_with = "payload_as_text")]
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
    pub failure_reason: String,
    pub last_status_code: Option<u16>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_attempted_at: DateTime<Utc>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub status: DlqStatus,
}

impl DlqEntry {
    /// `add`: pending, first attempt already spent, retry after `delay(1)`
    pub fn new(entry: NewDlqEntry, config: &DlqConfig, now: DateTime<Utc>) -> Self {
        Self {
            id: DlqEntryId::new(),
            task_id: entry.task_id,
            zone_id: entry.zone_id,
            url: entry.url,
            payload: entry.payload,
            headers: entry.headers,
            failure_reason: entry.failure_reason,
            last_status_code: entry.last_status_code,
            attempt_count: 1,
            max_attempts: config.max_attempts,
            first_failed_at: now,
            last_attempted_at: now,
            next_retry_at: Some(after(now, config.schedule.delay_for(1))),
            expires_at: after(now, config.ttl),
            status: DlqStatus::Pending,
        }
    }

    fn invalid(&self, action: &'static str) -> DlqError {
        DlqError::InvalidTransition {
            id: self.id.to_string(),
            from: self.status,
            action,
        }
    }

    /// Pending, scheduled at or before `now`, not yet expired
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == DlqStatus::Pending
            && self.next_retry_at.is_some_and(|at| at <= now)
            && self.expires_at > now
    }

    pub fn mark_retrying(&mut self) -> Result<(), DlqError> {
        if self.status != DlqStatus::Pending {
            return Err(self.invalid("mark retrying"));
        }
        self.status = DlqStatus::Retrying;
        self.next_retry_at = None;
        Ok(())
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) -> Result<(), DlqError> {
        if self.status.is_terminal() {
            return Err(self.invalid("record success"));
        }
        self.status = DlqStatus::Succeeded;
        self.next_retry_at = None;
        self.last_attempted_at = now;
        Ok(())
    }

    /// Count one more failed attempt. An exhausted entry stays exhausted.
    pub fn record_failure(
        &mut self,
        reason: &str,
        status_code: Option<u16>,
        schedule: &RetrySchedule,
        now: DateTime<Utc>,
    ) -> Result<(), DlqError> {
        if self.status.is_terminal() && self.status != DlqStatus::Exhausted {
            return Err(self.invalid("record failure"));
        }
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.failure_reason = reason.to_string();
        self.last_status_code = status_code;
        self.last_attempted_at = now;

        if self.attempt_count >= self.max_attempts {
            self.status = DlqStatus::Exhausted;
            self.next_retry_at = None;
        } else {
            self.status = DlqStatus::Pending;
            self.next_retry_at = Some(after(now, schedule.delay_for(self.attempt_count)));
        }
        Ok(())
    }

    pub fn abandon(&mut self) -> Result<(), DlqError> {
        if self.status.is_terminal() {
            return Err(self.invalid("abandon"));
        }
        self.status = DlqStatus::Abandoned;
        self.next_retry_at = None;
        Ok(())
    }

    /// Manual replay from any status: due immediately, attempts kept.
    /// An expired deadline is pushed out by a fresh TTL.
    pub fn replay(&mut self, ttl: Duration, now: DateTime<Utc>) {
        self.status = DlqStatus::Pending;
        self.next_retry_at = Some(now);
        if self.expires_at <= now {
            self.expires_at = after(now, ttl);
        }
    }

    /// Pending past `expires_at` becomes expired; returns whether it moved
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == DlqStatus::Pending && self.expires_at <= now {
            self.status = DlqStatus::Expired;
            self.next_retry_at = None;
            return true;
        }
        false
    }
}

/// List filter for the admin surface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DlqFilter {
    pub status: Option<DlqStatus>,
    pub zone_id: Option<ZoneId>,
    pub limit: Option<usize>,
}

impl DlqFilter {
    pub const DEFAULT_LIMIT: usize = 100;

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, 1_000)
    }

    pub fn matches(&self, entry: &DlqEntry) -> bool {
        self.status.is_none_or(|s| s == entry.status)
            && self.zone_id.as_ref().is_none_or(|z| *z == entry.zone_id)
    }
}

/// Entry count per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DlqStats {
    pub pending: u64,
    pub retrying: u64,
    pub succeeded: u64,
    pub exhausted: u64,
    pub expired: u64,
    pub abandoned: u64,
}

impl DlqStats {
    pub fn add(&mut self, status: DlqStatus, count: u64) {
        let slot = match status {
            DlqStatus::Pending => &mut self.pending,
            DlqStatus::Retrying => &mut self.retrying,
            DlqStatus::Succeeded => &mut self.succeeded,
            DlqStatus::Exhausted => &mut self.exhausted,
            DlqStatus::Expired => &mut self.expired,
            DlqStatus::Abandoned => &mut self.abandoned,
        };
        *slot += count;
    }

    pub fn total(&self) -> u64 {
        self.pending + self.retrying + self.succeeded + self.exhausted + self.expired + self.abandoned
    }
}
