//! Error taxonomy shared by every pipeline component.
//!
//! Component errors (`PaymentError`, `DeliveryError`, `DlqError`, ...) each
//! map onto one [`ErrorClass`], which decides retry policy and the HTTP
//! status surfaced to callers.

use std::fmt;

/// Error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Bad input, never retried (4xx)
    Validation,
    /// Missing or invalid actor identity
    Authentication,
    /// Idempotent replay or illegal state transition
    AlreadyProcessed,
    /// Bank refused the charge; terminal for the attempt, not a system fault
    Declined,
    /// Referenced resource does not exist
    NotFound,
    /// DB / queue / network hiccup; retryable by the caller
    TransientInfra,
    /// Delivery Worker gave up; routes to the DLQ
    Exhausted,
}

impl ErrorClass {
    /// HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorClass::Validation => 400,
            ErrorClass::Authentication => 401,
            ErrorClass::Declined => 402,
            ErrorClass::NotFound => 404,
            ErrorClass::AlreadyProcessed => 409,
            ErrorClass::TransientInfra => 503,
            ErrorClass::Exhausted => 502,
        }
    }

    /// Whether a client may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::TransientInfra | ErrorClass::Exhausted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Validation => "VALIDATION_ERROR",
            ErrorClass::Authentication => "AUTHENTICATION_ERROR",
            ErrorClass::AlreadyProcessed => "ALREADY_PROCESSED",
            ErrorClass::Declined => "DECLINED",
            ErrorClass::NotFound => "NOT_FOUND",
            ErrorClass::TransientInfra => "TRANSIENT_INFRA_ERROR",
            ErrorClass::Exhausted => "EXHAUSTED",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status() {
        assert_eq!(ErrorClass::Validation.http_status(), 400);
        assert_eq!(ErrorClass::Authentication.http_status(), 401);
        assert_eq!(ErrorClass::Declined.http_status(), 402);
        assert_eq!(ErrorClass::AlreadyProcessed.http_status(), 409);
        assert_eq!(ErrorClass::TransientInfra.http_status(), 503);
    }

    #[test]
    fn test_only_infra_is_retryable() {
        assert!(ErrorClass::TransientInfra.is_retryable());
        assert!(!ErrorClass::Validation.is_retryable());
        assert!(!ErrorClass::Declined.is_retryable());
        assert!(!ErrorClass::AlreadyProcessed.is_retryable());
    }
}
