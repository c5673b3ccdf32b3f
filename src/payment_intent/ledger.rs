//! Ledger posting policy.
//!
//! Turns a succeeded intent into the legs posted to the ledger. Every leg
//! carries a reference id derived from the intent id so the ledger can
//! deduplicate each leg independently when a posting is retried.
//!
//! The legs of one split payment always sum to zero:
//! `+(A - F)` to the connected account, `+F` to the platform, `-A` to the customer.

use serde::{Deserialize, Serialize};

use super::types::PaymentIntent;
use crate::core_types::{Mode, ZoneId};

/// One single-account entry of a posting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLeg {
    pub account_id: String,
    /// Signed minor units: credit > 0, debit < 0
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub reference_id: String,
    pub zone_id: ZoneId,
    pub mode: Mode,
}

/// Reference id suffixes for the three split legs
pub const NET_LEG_SUFFIX: &str = "net";
pub const FEE_LEG_SUFFIX: &str = "fee";
pub const DEBIT_LEG_SUFFIX: &str = "debit";

fn leg(
    intent: &PaymentIntent,
    account_id: &str,
    amount: i64,
    description: String,
    reference_id: String,
) -> LedgerLeg {
    LedgerLeg {
        account_id: account_id.to_string(),
        amount,
        currency: intent.currency.clone(),
        description,
        reference_id,
        zone_id: intent.zone_id.clone(),
        mode: intent.mode,
    }
}

/// Legs to post for a succeeded intent, in posting order
pub fn plan_postings(intent: &PaymentIntent, platform_account_id: &str) -> Vec<LedgerLeg> {
    let id = intent.id.to_string();

    match intent.split() {
        Some((connected_account, fee)) => {
            let net = intent.amount - fee;
            vec![
                leg(
                    intent,
                    connected_account,
                    net,
                    format!("Payment {} net to {}", id, connected_account),
                    format!("{}_{}", id, NET_LEG_SUFFIX),
                ),
                leg(
                    intent,
                    platform_account_id,
                    fee,
                    format!("Payment {} application fee", id),
                    format!("{}_{}", id, FEE_LEG_SUFFIX),
                ),
                leg(
                    intent,
                    &intent.user_id,
                    -intent.amount,
                    format!("Payment {} charge", id),
                    format!("{}_{}", id, DEBIT_LEG_SUFFIX),
                ),
            ]
        }
        None => vec![leg(
            intent,
            &intent.user_id,
            intent.amount,
            format!("Payment {}", id),
            id.clone(),
        )],
    }
}
