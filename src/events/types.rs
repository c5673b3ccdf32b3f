//! Event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core_types::{EventId, Mode, ZoneId};
use crate::payment_intent::{PaymentIntent, Refund};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "payment.succeeded")]
    PaymentSucceeded,
    #[serde(rename = "payment.failed")]
    PaymentFailed,
    #[serde(rename = "refund.completed")]
    RefundCompleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PaymentSucceeded => "payment.succeeded",
            EventType::PaymentFailed => "payment.failed",
            EventType::RefundCompleted => "refund.completed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment.succeeded" => Ok(EventType::PaymentSucceeded),
            "payment.failed" => Ok(EventType::PaymentFailed),
            "refund.completed" => Ok(EventType::RefundCompleted),
            other => Err(format!("unknown event type: {}", other)),
        }
    }
}

/// Type-specific event body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Payment(PaymentIntent),
    Refund(Refund),
}

/// Immutable fact about a completed transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub zone_id: ZoneId,
    pub mode: Mode,
    pub payload: EventPayload,
}

impl Event {
    pub fn payment(event_type: EventType, intent: &PaymentIntent) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            timestamp: Utc::now(),
            zone_id: intent.zone_id.clone(),
            mode: intent.mode,
            payload: EventPayload::Payment(intent.clone()),
        }
    }

    pub fn refund_completed(refund: &Refund, intent: &PaymentIntent) -> Self {
        Self {
            id: EventId::new(),
            event_type: EventType::RefundCompleted,
            timestamp: Utc::now(),
            zone_id: intent.zone_id.clone(),
            mode: intent.mode,
            payload: EventPayload::Refund(refund.clone()),
        }
    }

    /// Ordering key: the payment id, also for refunds
    pub fn partition_key(&self) -> String {
        match &self.payload {
            EventPayload::Payment(intent) => intent.id.to_string(),
            EventPayload::Refund(refund) => refund.payment_intent_id.to_string(),
        }
    }
}
