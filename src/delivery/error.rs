//! Delivery error types

use std::time::Duration;
use thiserror::Error;

use crate::error::ErrorClass;

/// The worker spent its whole attempt budget without a 2xx
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("delivery {task_id} exhausted after {attempts} attempts (last status: {last_status:?}, last error: {last_error})")]
pub struct ExhaustedError {
    pub task_id: String,
    pub attempts: u32,
    pub last_status: Option<u16>,
    pub last_error: String,
}

#[derive(Error, Debug, Clone)]
pub enum DeliveryError {
    /// 4xx other than 429: the request is permanently malformed
    #[error("delivery {task_id} rejected with status {status}")]
    Rejected { task_id: String, status: u16 },

    #[error(transparent)]
    Exhausted(#[from] ExhaustedError),

    #[error("delivery {task_id} cancelled after {attempts} attempts")]
    Cancelled { task_id: String, attempts: u32 },

    #[error("channel notification {task_id} failed: {reason} (next backoff {next_backoff:?})")]
    Channel {
        task_id: String,
        reason: String,
        next_backoff: Duration,
    },

    #[error("dedup store error: {0}")]
    Store(String),
}

impl DeliveryError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DeliveryError::Rejected { .. } => ErrorClass::Validation,
            DeliveryError::Exhausted(_) => ErrorClass::Exhausted,
            DeliveryError::Cancelled { .. }
            | DeliveryError::Channel { .. }
            | DeliveryError::Store(_) => ErrorClass::TransientInfra,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            DeliveryError::Rejected { .. } => "DELIVERY_REJECTED",
            DeliveryError::Exhausted(_) => "DELIVERY_EXHAUSTED",
            DeliveryError::Cancelled { .. } => "DELIVERY_CANCELLED",
            DeliveryError::Channel { .. } => "CHANNEL_NOTIFICATION_FAILED",
            DeliveryError::Store(_) => "DEDUP_STORE_ERROR",
        }
    }
}

impl From<sqlx::Error> for DeliveryError {
    fn from(e: sqlx::Error) -> Self {
        DeliveryError::Store(e.to_string())
    }
}
