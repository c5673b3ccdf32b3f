//! Payment intent error types

use thiserror::Error;

use super::state::PaymentIntentStatus;
use super::types::Decline;
use crate::error::ErrorClass;

#[derive(Error, Debug, Clone)]
pub enum PaymentError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Payment intent not found: {0}")]
    NotFound(String),

    /// Replay of a completed transition, or an illegal one
    #[error("Payment intent {id} already processed (status: {status})")]
    AlreadyProcessed {
        id: String,
        status: PaymentIntentStatus,
    },

    #[error("Payment declined: {}", .0.decline_code)]
    Declined(Decline),

    #[error("Bank gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Confirm cancelled by the caller")]
    Cancelled,
}

impl PaymentError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PaymentError::Validation(_) => ErrorClass::Validation,
            PaymentError::NotFound(_) => ErrorClass::NotFound,
            PaymentError::AlreadyProcessed { .. } => ErrorClass::AlreadyProcessed,
            PaymentError::Declined(_) => ErrorClass::Declined,
            PaymentError::GatewayUnavailable(_)
            | PaymentError::Persistence(_)
            | PaymentError::Cancelled => ErrorClass::TransientInfra,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::Validation(_) => "VALIDATION_ERROR",
            PaymentError::NotFound(_) => "PAYMENT_INTENT_NOT_FOUND",
            PaymentError::AlreadyProcessed { .. } => "ALREADY_PROCESSED",
            PaymentError::Declined(_) => "CARD_DECLINED",
            PaymentError::GatewayUnavailable(_) => "GATEWAY_UNAVAILABLE",
            PaymentError::Persistence(_) => "PERSISTENCE_ERROR",
            PaymentError::Cancelled => "CANCELLED",
        }
    }
}

impl From<sqlx::Error> for PaymentError {
    fn from(e: sqlx::Error) -> Self {
        PaymentError::Persistence(e.to_string())
    }
}
