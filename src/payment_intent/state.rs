//! Payment intent status machine.
//!
//! ```text
//! requires_payment_method ──confirm ok──▶ succeeded ──refund──▶ refunded
//!            │
//!            └──────confirm declined──▶ failed
//! ```

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    /// Created, waiting for a confirm with a payment method
    RequiresPaymentMethod,
    /// Charge approved; only a refund may follow
    Succeeded,
    /// Terminal for this attempt; no automatic re-confirmation
    Failed,
    /// Terminal
    Refunded,
}

impl PaymentIntentStatus {
    /// No further transition is possible
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentIntentStatus::Failed | PaymentIntentStatus::Refunded
        )
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: PaymentIntentStatus) -> bool {
        use PaymentIntentStatus::*;
        matches!(
            (self, next),
            (RequiresPaymentMethod, Succeeded)
                | (RequiresPaymentMethod, Failed)
                | (Succeeded, Refunded)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentIntentStatus::RequiresPaymentMethod => "requires_payment_method",
            PaymentIntentStatus::Succeeded => "succeeded",
            PaymentIntentStatus::Failed => "failed",
            PaymentIntentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentIntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentIntentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requires_payment_method" => Ok(PaymentIntentStatus::RequiresPaymentMethod),
            "succeeded" => Ok(PaymentIntentStatus::Succeeded),
            "failed" => Ok(PaymentIntentStatus::Failed),
            "refunded" => Ok(PaymentIntentStatus::Refunded),
            other => Err(format!("unknown payment intent status: {}", other)),
        }
    }
}
