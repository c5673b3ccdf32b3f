//! Payment intent core types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::PaymentError;
use super::state::PaymentIntentStatus;
use crate::core_types::{Mode, PaymentIntentId, RefundId, ZoneId};

/// A requested money movement. Amounts are integer minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: PaymentIntentId,
    pub zone_id: ZoneId,
    pub mode: Mode,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentIntentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Payer
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_fee_amount: Option<i64>,
    /// Connected account receiving the net amount of a split payment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_behalf_of: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    /// Build a new intent in `requires_payment_method` from a validated request
    pub fn from_request(req: CreatePaymentIntent) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentIntentId::new(),
            zone_id: req.zone_id,
            mode: req.mode,
            amount: req.amount,
            currency: req.currency.to_ascii_uppercase(),
            status: PaymentIntentStatus::RequiresPaymentMethod,
            description: req.description,
            user_id: req.user_id,
            application_fee_amount: req.application_fee_amount,
            on_behalf_of: req.on_behalf_of,
            decline_code: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Split payment: a positive application fee routed on behalf of a connected account
    pub fn split(&self) -> Option<(&str, i64)> {
        match (self.on_behalf_of.as_deref(), self.application_fee_amount) {
            (Some(account), Some(fee)) if fee > 0 && !account.is_empty() => Some((account, fee)),
            _ => None,
        }
    }
}

/// Input to `Create`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePaymentIntent {
    pub zone_id: ZoneId,
    #[serde(default)]
    pub mode: Mode,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub application_fee_amount: Option<i64>,
    #[serde(default)]
    pub on_behalf_of: Option<String>,
}

impl CreatePaymentIntent {
    pub fn validate(&self) -> Result<(), PaymentError> {
        if self.amount <= 0 {
            return Err(PaymentError::Validation("amount must be greater than zero".into()));
        }
        if self.currency.trim().is_empty() {
            return Err(PaymentError::Validation("currency is required".into()));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PaymentError::Validation(format!(
                "currency must be a 3-letter ISO 4217 code, got '{}'",
                self.currency
            )));
        }
        if self.zone_id.trim().is_empty() {
            return Err(PaymentError::Validation("zone_id is required".into()));
        }
        if self.user_id.trim().is_empty() {
            return Err(PaymentError::Validation("user_id is required".into()));
        }
        if let Some(fee) = self.application_fee_amount {
            if fee < 0 || fee >= self.amount {
                return Err(PaymentError::Validation(
                    "application_fee_amount must be >= 0 and less than amount".into(),
                ));
            }
            if fee > 0 && self.on_behalf_of.as_deref().is_none_or(str::is_empty) {
                return Err(PaymentError::Validation(
                    "application_fee_amount requires on_behalf_of".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Structured bank decline returned from `Confirm`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decline {
    pub payment_intent_id: PaymentIntentId,
    pub decline_code: String,
}

/// Outcome of a successful `Refund`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    pub id: RefundId,
    pub payment_intent_id: PaymentIntentId,
    pub amount: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}
