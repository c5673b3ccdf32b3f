//! Gateway request/response types and error mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core_types::{Mode, ZoneId};
use crate::dlq::DlqError;
use crate::error::ErrorClass;
use crate::idempotency::IdempotencyError;
use crate::payment_intent::{CreatePaymentIntent, PaymentError};

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: payload on success, structured detail on some errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: error_codes::SUCCESS,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }
}

/// Error codes
pub mod error_codes {
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;

    // Auth errors (2xxx)
    pub const AUTH_FAILED: i32 = 2001;

    // Payment outcome (3xxx)
    pub const CARD_DECLINED: i32 = 3001;

    // Resource errors (4xxx)
    pub const NOT_FOUND: i32 = 4004;
    pub const ALREADY_PROCESSED: i32 = 4009;

    // Server errors (5xxx)
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
    pub const DELIVERY_EXHAUSTED: i32 = 5002;
}

fn code_for(class: ErrorClass) -> i32 {
    match class {
        ErrorClass::Validation => error_codes::INVALID_PARAMETER,
        ErrorClass::Authentication => error_codes::AUTH_FAILED,
        ErrorClass::Declined => error_codes::CARD_DECLINED,
        ErrorClass::NotFound => error_codes::NOT_FOUND,
        ErrorClass::AlreadyProcessed => error_codes::ALREADY_PROCESSED,
        ErrorClass::TransientInfra => error_codes::SERVICE_UNAVAILABLE,
        ErrorClass::Exhausted => error_codes::DELIVERY_EXHAUSTED,
    }
}

/// Error surfaced by handlers; the class picks the HTTP status
#[derive(Debug)]
pub struct ApiError {
    pub class: ErrorClass,
    pub code: &'static str,
    pub msg: String,
    pub data: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(class: ErrorClass, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            class,
            code,
            msg: msg.into(),
            data: None,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(ErrorClass::Validation, "VALIDATION_ERROR", msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(ErrorClass::Authentication, "AUTHENTICATION_ERROR", msg)
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.class.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(code = self.code, msg = %self.msg, "Request failed");
        }
        let body = ApiResponse {
            code: code_for(self.class),
            msg: format!("{}: {}", self.code, self.msg),
            data: self.data,
        };
        (status, Json(body)).into_response()
    }
}

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        let data = match &e {
            PaymentError::Declined(decline) => serde_json::to_value(decline).ok(),
            _ => None,
        };
        Self {
            class: e.class(),
            code: e.code(),
            msg: e.to_string(),
            data,
        }
    }
}

impl From<DlqError> for ApiError {
    fn from(e: DlqError) -> Self {
        Self::new(e.class(), e.code(), e.to_string())
    }
}

impl From<IdempotencyError> for ApiError {
    fn from(e: IdempotencyError) -> Self {
        Self::new(e.class(), e.code(), e.to_string())
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(e: validator::ValidationErrors) -> Self {
        Self::validation(e.to_string())
    }
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

pub fn created<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::success(data))))
}

/// POST /v1/payment_intents
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePaymentIntentBody {
    #[validate(length(min = 1, max = 64))]
    pub zone_id: ZoneId,
    #[serde(default)]
    pub mode: Mode,
    #[validate(range(min = 1))]
    pub amount: i64,
    #[validate(length(equal = 3))]
    pub currency: String,
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub application_fee_amount: Option<i64>,
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub on_behalf_of: Option<String>,
}

impl From<CreatePaymentIntentBody> for CreatePaymentIntent {
    fn from(body: CreatePaymentIntentBody) -> Self {
        CreatePaymentIntent {
            zone_id: body.zone_id,
            mode: body.mode,
            amount: body.amount,
            currency: body.currency,
            description: body.description,
            user_id: body.user_id,
            application_fee_amount: body.application_fee_amount,
            on_behalf_of: body.on_behalf_of,
        }
    }
}

/// POST /v1/payment_intents/{id}/confirm
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ConfirmBody {
    #[validate(length(min = 1, max = 256))]
    pub payment_method: String,
}

/// GET /v1/dlq query
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DlqListQuery {
    pub status: Option<String>,
    pub zone_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub build: &'static str,
}
