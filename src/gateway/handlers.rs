use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use super::state::AppState;
use super::types::{
    ApiError, ApiResponse, ApiResult, ConfirmBody, CreatePaymentIntentBody, DlqListQuery,
    HealthResponse, created, ok,
};
use crate::core_types::{DlqEntryId, PaymentIntentId};
use crate::dlq::{DlqEntry, DlqFilter, DlqStats, DlqStatus};
use crate::payment_intent::{PaymentIntent, Refund};

fn parse_payment_id(raw: &str) -> Result<PaymentIntentId, ApiError> {
    raw.parse()
        .map_err(|e: crate::core_types::IdParseError| ApiError::validation(e.to_string()))
}

fn parse_dlq_id(raw: &str) -> Result<DlqEntryId, ApiError> {
    raw.parse()
        .map_err(|e: crate::core_types::IdParseError| ApiError::validation(e.to_string()))
}

/// POST /v1/payment_intents
pub async fn create_payment_intent(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreatePaymentIntentBody>,
) -> ApiResult<PaymentIntent> {
    body.validate()?;
    let intent = state.engine.create(body.into()).await?;
    created(intent)
}

/// GET /v1/payment_intents/{id}
pub async fn get_payment_intent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<PaymentIntent> {
    let id = parse_payment_id(&id)?;
    ok(state.engine.get(&id).await?)
}

/// POST /v1/payment_intents/{id}/confirm
///
/// A client disconnect drops this future, which cancels the token. The
/// engine still finishes a charge that already started.
pub async fn confirm_payment_intent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ConfirmBody>,
) -> ApiResult<PaymentIntent> {
    body.validate()?;
    let id = parse_payment_id(&id)?;

    let cancel = CancellationToken::new();
    let _disconnect = cancel.clone().drop_guard();
    let intent = state
        .engine
        .confirm(&id, &body.payment_method, &cancel)
        .await?;
    ok(intent)
}

/// POST /v1/payment_intents/{id}/refund
pub async fn refund_payment_intent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Refund> {
    let id = parse_payment_id(&id)?;
    ok(state.engine.refund(&id).await?)
}

/// GET /v1/dlq
pub async fn list_dlq(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DlqListQuery>,
) -> ApiResult<Vec<DlqEntry>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<DlqStatus>)
        .transpose()
        .map_err(ApiError::validation)?;
    let filter = DlqFilter {
        status,
        zone_id: query.zone_id,
        limit: query.limit,
    };
    ok(state.dlq.list(&filter).await?)
}

/// GET /v1/dlq/stats
pub async fn dlq_stats(State(state): State<Arc<AppState>>) -> ApiResult<DlqStats> {
    ok(state.dlq.stats().await?)
}

/// GET /v1/dlq/{id}
pub async fn get_dlq_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<DlqEntry> {
    let id = parse_dlq_id(&id)?;
    ok(state.dlq.get(&id).await?)
}

/// POST /v1/dlq/{id}/replay
pub async fn replay_dlq_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<DlqEntry> {
    let id = parse_dlq_id(&id)?;
    let entry = state.dlq.replay(&id).await?;
    tracing::info!(dlq_id = %entry.id, task_id = %entry.task_id, "DLQ entry replayed");
    ok(entry)
}

/// POST /v1/dlq/{id}/abandon
pub async fn abandon_dlq_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<DlqEntry> {
    let id = parse_dlq_id(&id)?;
    let entry = state.dlq.abandon(&id).await?;
    tracing::info!(dlq_id = %entry.id, task_id = %entry.task_id, "DLQ entry abandoned");
    ok(entry)
}

/// GET /health
///
/// 503 when a configured database does not answer.
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let database = match &state.db {
        None => "in-memory",
        Some(db) => match db.health_check().await {
            Ok(()) => "ok",
            Err(e) => {
                tracing::error!("[HEALTH] PostgreSQL ping failed: {}", e);
                "unavailable"
            }
        },
    };

    let status = if database == "unavailable" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(ApiResponse::success(HealthResponse {
            status: if status.is_success() { "ok" } else { "degraded" },
            database,
            build: env!("PAYRAIL_BUILD"),
        })),
    )
}
