//! Payment intent persistence seams.
//!
//! Every status change goes through [`PaymentIntentStore::transition`], a
//! compare-and-swap on the current status. Outbox legs passed to the same
//! call are written atomically with the status change.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Mutex;

use super::error::PaymentError;
use super::ledger::LedgerLeg;
use super::state::PaymentIntentStatus;
use super::types::PaymentIntent;
use crate::core_types::PaymentIntentId;

#[async_trait]
pub trait PaymentIntentStore: Send + Sync {
    async fn insert(&self, intent: &PaymentIntent) -> Result<(), PaymentError>;

    async fn get(&self, id: &PaymentIntentId) -> Result<Option<PaymentIntent>, PaymentError>;

    /// Move `id` from `expected` to `next`.
    ///
    /// Returns false when the stored status is no longer `expected`.
    async fn transition(
        &self,
        id: &PaymentIntentId,
        expected: PaymentIntentStatus,
        next: PaymentIntentStatus,
        decline_code: Option<&str>,
        outbox_legs: &[LedgerLeg],
    ) -> Result<bool, PaymentError>;
}

/// A ledger leg waiting in the outbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRecord {
    pub id: i64,
    pub payment_intent_id: String,
    pub leg: LedgerLeg,
    pub attempts: i32,
}

#[async_trait]
pub trait LedgerOutboxStore: Send + Sync {
    /// Oldest undispatched legs first
    async fn fetch_undispatched(&self, limit: usize) -> Result<Vec<OutboxRecord>, PaymentError>;

    async fn mark_dispatched(&self, id: i64, transaction_id: &str) -> Result<(), PaymentError>;

    async fn record_attempt_failure(&self, id: i64, error: &str) -> Result<(), PaymentError>;
}

#[derive(Debug, Clone)]
struct OutboxSlot {
    record: OutboxRecord,
    last_error: Option<String>,
    transaction_id: Option<String>,
}

/// In-memory store used when no database is configured, and by tests
#[derive(Default)]
pub struct InMemoryPaymentStore {
    intents: DashMap<PaymentIntentId, PaymentIntent>,
    outbox: Mutex<Vec<OutboxSlot>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn outbox(&self) -> Result<std::sync::MutexGuard<'_, Vec<OutboxSlot>>, PaymentError> {
        self.outbox
            .lock()
            .map_err(|_| PaymentError::Persistence("outbox lock poisoned".into()))
    }

    /// Number of outbox legs not yet dispatched
    pub fn pending_outbox_len(&self) -> usize {
        self.outbox
            .lock()
            .map(|o| o.iter().filter(|s| s.transaction_id.is_none()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl PaymentIntentStore for InMemoryPaymentStore {
    async fn insert(&self, intent: &PaymentIntent) -> Result<(), PaymentError> {
        use dashmap::mapref::entry::Entry;
        match self.intents.entry(intent.id) {
            Entry::Occupied(_) => Err(PaymentError::Persistence(format!(
                "duplicate payment intent id {}",
                intent.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(intent.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: &PaymentIntentId) -> Result<Option<PaymentIntent>, PaymentError> {
        Ok(self.intents.get(id).map(|r| r.value().clone()))
    }

    async fn transition(
        &self,
        id: &PaymentIntentId,
        expected: PaymentIntentStatus,
        next: PaymentIntentStatus,
        decline_code: Option<&str>,
        outbox_legs: &[LedgerLeg],
    ) -> Result<bool, PaymentError> {
        // The shard guard is held until the outbox rows are in, so the pair is atomic
        let Some(mut intent) = self.intents.get_mut(id) else {
            return Ok(false);
        };
        if intent.status != expected {
            return Ok(false);
        }

        if !outbox_legs.is_empty() {
            let mut outbox = self.outbox()?;
            for leg in outbox_legs {
                if outbox.iter().any(|s| s.record.leg.reference_id == leg.reference_id) {
                    continue;
                }
                let record = OutboxRecord {
                    id: outbox.len() as i64 + 1,
                    payment_intent_id: id.to_string(),
                    leg: leg.clone(),
                    attempts: 0,
                };
                outbox.push(OutboxSlot {
                    record,
                    last_error: None,
                    transaction_id: None,
                });
            }
        }

        intent.status = next;
        if let Some(code) = decline_code {
            intent.decline_code = Some(code.to_string());
        }
        intent.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl LedgerOutboxStore for InMemoryPaymentStore {
    async fn fetch_undispatched(&self, limit: usize) -> Result<Vec<OutboxRecord>, PaymentError> {
        Ok(self
            .outbox()?
            .iter()
            .filter(|s| s.transaction_id.is_none())
            .take(limit)
            .map(|s| s.record.clone())
            .collect())
    }

    async fn mark_dispatched(&self, id: i64, transaction_id: &str) -> Result<(), PaymentError> {
        let mut outbox = self.outbox()?;
        if let Some(slot) = outbox.iter_mut().find(|s| s.record.id == id) {
            slot.record.attempts += 1;
            slot.transaction_id = Some(transaction_id.to_string());
        }
        Ok(())
    }

    async fn record_attempt_failure(&self, id: i64, error: &str) -> Result<(), PaymentError> {
        let mut outbox = self.outbox()?;
        if let Some(slot) = outbox.iter_mut().find(|s| s.record.id == id) {
            slot.record.attempts += 1;
            slot.last_error = Some(error.to_string());
        }
        Ok(())
    }
}
