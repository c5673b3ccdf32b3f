//! Payment Intent Engine
//!
//! Drives intents through their status machine. A confirm charges the
//! bank, commits the status with a CAS update, and only then fans out the
//! side effects: live pub/sub, the durable event, and ledger legs. Side
//! effect failures are operational alerts; they never roll back a
//! committed status.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::adapters::{BankGateway, ChargeResult, LedgerService};
use super::error::PaymentError;
use super::ledger::{LedgerLeg, plan_postings};
use super::repository::PaymentIntentStore;
use super::state::PaymentIntentStatus;
use super::types::{CreatePaymentIntent, Decline, PaymentIntent, Refund};
use crate::config::PostingMode;
use crate::core_types::{PaymentIntentId, RefundId};
use crate::events::{Event, EventPublisher, EventType, PubSub};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Account credited with application fees of split payments
    pub platform_account_id: String,
    pub posting_mode: PostingMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            platform_account_id: "platform".to_string(),
            posting_mode: PostingMode::Direct,
        }
    }
}

/// Live stream channel for a zone
pub fn live_channel(zone_id: &str) -> String {
    format!("events:{}", zone_id)
}

/// Releases the per-intent confirm slot on drop
struct ConfirmGuard {
    id: PaymentIntentId,
    in_flight: Arc<DashMap<PaymentIntentId, ()>>,
}

impl Drop for ConfirmGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}

#[derive(Clone)]
pub struct PaymentIntentEngine {
    store: Arc<dyn PaymentIntentStore>,
    bank: Arc<dyn BankGateway>,
    ledger: Arc<dyn LedgerService>,
    publisher: EventPublisher,
    pubsub: Arc<dyn PubSub>,
    config: EngineConfig,
    in_flight: Arc<DashMap<PaymentIntentId, ()>>,
}

impl PaymentIntentEngine {
    pub fn new(
        store: Arc<dyn PaymentIntentStore>,
        bank: Arc<dyn BankGateway>,
        ledger: Arc<dyn LedgerService>,
        publisher: EventPublisher,
        pubsub: Arc<dyn PubSub>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            bank,
            ledger,
            publisher,
            pubsub,
            config,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub async fn create(&self, req: CreatePaymentIntent) -> Result<PaymentIntent, PaymentError> {
        req.validate()?;
        let intent = PaymentIntent::from_request(req);
        self.store.insert(&intent).await?;
        info!(
            payment_id = %intent.id,
            zone_id = %intent.zone_id,
            amount = intent.amount,
            currency = %intent.currency,
            "Payment intent created"
        );
        Ok(intent)
    }

    pub async fn get(&self, id: &PaymentIntentId) -> Result<PaymentIntent, PaymentError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))
    }

    /// Charge and settle an intent in `requires_payment_method`.
    ///
    /// Returns the succeeded intent, or `Declined` after the `failed`
    /// transition. Once the charge has started it runs to completion on
    /// its own task: cancelling `cancel` returns `Cancelled` to the caller
    /// but the bank result still drives the transition.
    pub async fn confirm(
        &self,
        id: &PaymentIntentId,
        payment_method_token: &str,
        cancel: &CancellationToken,
    ) -> Result<PaymentIntent, PaymentError> {
        // Status is read under the guard so a finished confirm is always observed
        let guard = self.acquire(id)?;
        let intent = self.get(id).await?;
        if intent.status != PaymentIntentStatus::RequiresPaymentMethod {
            return Err(PaymentError::AlreadyProcessed {
                id: id.to_string(),
                status: intent.status,
            });
        }

        if cancel.is_cancelled() {
            return Err(PaymentError::Cancelled);
        }

        let engine = self.clone();
        let token = payment_method_token.to_string();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            engine.charge_and_transition(intent, &token).await
        });

        tokio::select! {
            joined = handle => joined
                .map_err(|e| PaymentError::Persistence(format!("confirm task failed: {}", e)))?,
            _ = cancel.cancelled() => {
                warn!(payment_id = %id, "Confirm cancelled by caller; charge continues in background");
                Err(PaymentError::Cancelled)
            }
        }
    }

    /// Move a succeeded intent to `refunded` and emit `refund.completed`.
    /// Ledger reversal is left to the ledger.
    pub async fn refund(&self, id: &PaymentIntentId) -> Result<Refund, PaymentError> {
        let intent = self.get(id).await?;
        if !intent.status.can_transition_to(PaymentIntentStatus::Refunded) {
            return Err(PaymentError::AlreadyProcessed {
                id: id.to_string(),
                status: intent.status,
            });
        }

        let moved = self
            .store
            .transition(
                id,
                PaymentIntentStatus::Succeeded,
                PaymentIntentStatus::Refunded,
                None,
                &[],
            )
            .await?;
        if !moved {
            return Err(self.already_processed(id).await);
        }

        let refund = Refund {
            id: RefundId::new(),
            payment_intent_id: intent.id,
            amount: intent.amount,
            currency: intent.currency.clone(),
            created_at: Utc::now(),
        };
        let mut refunded = intent;
        refunded.status = PaymentIntentStatus::Refunded;
        refunded.updated_at = refund.created_at;

        info!(payment_id = %id, refund_id = %refund.id, "Payment refunded");
        let event = Event::refund_completed(&refund, &refunded);
        self.fan_out_event(&event).await;
        Ok(refund)
    }

    fn acquire(&self, id: &PaymentIntentId) -> Result<ConfirmGuard, PaymentError> {
        use dashmap::mapref::entry::Entry;
        match self.in_flight.entry(*id) {
            Entry::Occupied(_) => {
                debug!(payment_id = %id, "Confirm already in flight");
                Err(PaymentError::AlreadyProcessed {
                    id: id.to_string(),
                    status: PaymentIntentStatus::RequiresPaymentMethod,
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(ConfirmGuard {
                    id: *id,
                    in_flight: self.in_flight.clone(),
                })
            }
        }
    }

    async fn already_processed(&self, id: &PaymentIntentId) -> PaymentError {
        match self.get(id).await {
            Ok(current) => PaymentError::AlreadyProcessed {
                id: id.to_string(),
                status: current.status,
            },
            Err(e) => e,
        }
    }

    async fn charge_and_transition(
        &self,
        mut intent: PaymentIntent,
        payment_method_token: &str,
    ) -> Result<PaymentIntent, PaymentError> {
        let id = intent.id;
        let reference = id.to_string();
        let charge = self
            .bank
            .charge(
                intent.amount,
                &intent.currency,
                payment_method_token,
                &reference,
            )
            .await;

        match charge {
            Err(e) => {
                // Outcome unknown: leave the intent retryable under the same key
                warn!(payment_id = %id, bank = self.bank.name(), error = %e, "Bank charge failed");
                Err(PaymentError::GatewayUnavailable(e.to_string()))
            }
            Ok(ChargeResult::Declined { decline_code }) => {
                let moved = self
                    .store
                    .transition(
                        &id,
                        PaymentIntentStatus::RequiresPaymentMethod,
                        PaymentIntentStatus::Failed,
                        Some(&decline_code),
                        &[],
                    )
                    .await?;
                if !moved {
                    return Err(self.already_processed(&id).await);
                }
                info!(payment_id = %id, decline_code = %decline_code, "Payment declined");

                intent.status = PaymentIntentStatus::Failed;
                intent.decline_code = Some(decline_code.clone());
                intent.updated_at = Utc::now();
                self.fan_out_event(&Event::payment(EventType::PaymentFailed, &intent))
                    .await;

                Err(PaymentError::Declined(Decline {
                    payment_intent_id: id,
                    decline_code,
                }))
            }
            Ok(ChargeResult::Approved { charge_id }) => {
                let legs = plan_postings(&intent, &self.config.platform_account_id);
                let outbox: &[LedgerLeg] = match self.config.posting_mode {
                    PostingMode::Outbox => &legs,
                    PostingMode::Direct => &[],
                };
                let moved = self
                    .store
                    .transition(
                        &id,
                        PaymentIntentStatus::RequiresPaymentMethod,
                        PaymentIntentStatus::Succeeded,
                        None,
                        outbox,
                    )
                    .await?;
                if !moved {
                    error!(payment_id = %id, charge_id = %charge_id, "Charge approved but intent moved concurrently");
                    return Err(self.already_processed(&id).await);
                }
                info!(payment_id = %id, charge_id = %charge_id, legs = legs.len(), "Payment succeeded");

                intent.status = PaymentIntentStatus::Succeeded;
                intent.updated_at = Utc::now();
                self.fan_out_event(&Event::payment(EventType::PaymentSucceeded, &intent))
                    .await;
                if self.config.posting_mode == PostingMode::Direct {
                    self.post_legs(&intent, &legs).await;
                }
                Ok(intent)
            }
        }
    }

    /// Live pub/sub first, then the durable event. Failures are logged only.
    async fn fan_out_event(&self, event: &Event) {
        match serde_json::to_vec(event) {
            Ok(bytes) => {
                if let Err(e) = self.pubsub.publish(&live_channel(&event.zone_id), bytes) {
                    warn!(event_id = %event.id, partition_key = %event.partition_key(), error = %e, "Live publish failed");
                }
            }
            Err(e) => warn!(event_id = %event.id, error = %e, "Event encoding failed"),
        }

        if let Err(e) = self.publisher.publish(event).await {
            error!(
                event_id = %event.id,
                event_type = %event.event_type,
                payment_id = %event.partition_key(),
                error = %e,
                "Durable event publication failed after commit"
            );
        }
    }

    /// One ledger call per leg. A failed leg is logged and the rest still post.
    async fn post_legs(&self, intent: &PaymentIntent, legs: &[LedgerLeg]) {
        for leg in legs {
            match self.ledger.record_transaction(leg).await {
                Ok(receipt) => debug!(
                    payment_id = %intent.id,
                    reference_id = %leg.reference_id,
                    transaction_id = %receipt.transaction_id,
                    "Ledger leg posted"
                ),
                Err(e) => error!(
                    payment_id = %intent.id,
                    reference_id = %leg.reference_id,
                    account_id = %leg.account_id,
                    amount = leg.amount,
                    error = %e,
                    "Ledger posting failed after commit"
                ),
            }
        }
    }
}
