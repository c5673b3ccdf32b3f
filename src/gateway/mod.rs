//! HTTP gateway
//!
//! Thin axum surface over the engine and the DLQ. Every request passes the
//! actor middleware; mutating payment routes additionally sit behind the
//! idempotency layer.

pub mod auth;
pub mod handlers;
pub mod state;
pub mod types;

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::idempotency::{IdempotencyLayer, idempotency_middleware};
use state::AppState;

pub fn router(state: Arc<AppState>, idempotency: IdempotencyLayer) -> Router {
    // Mutations replay cached outcomes under Idempotency-Key
    let payment_mutations = Router::new()
        .route("/", post(handlers::create_payment_intent))
        .route("/{id}/confirm", post(handlers::confirm_payment_intent))
        .route("/{id}/refund", post(handlers::refund_payment_intent))
        .route_layer(from_fn_with_state(idempotency, idempotency_middleware));

    let payment_routes = Router::new()
        .route("/{id}", get(handlers::get_payment_intent))
        .merge(payment_mutations);

    let dlq_routes = Router::new()
        .route("/", get(handlers::list_dlq))
        .route("/stats", get(handlers::dlq_stats))
        .route("/{id}", get(handlers::get_dlq_entry))
        .route("/{id}/replay", post(handlers::replay_dlq_entry))
        .route("/{id}/abandon", post(handlers::abandon_dlq_entry));

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/v1/payment_intents", payment_routes)
        .nest("/v1/dlq", dlq_routes)
        .layer(from_fn(auth::actor_middleware))
        .with_state(state)
}

/// Serve until `cancel` fires, then drain in-flight requests
pub async fn run_server(addr: &str, app: Router, cancel: CancellationToken) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlq::{DlqConfig, DlqStore, InMemoryDlqStore, NewDlqEntry};
    use crate::events::EventPublisher;
    use crate::events::bus::mock::{RecordingBus, RecordingPubSub};
    use crate::idempotency::{IDEMPOTENCY_KEY_HEADER, InMemoryIdempotencyStore};
    use crate::payment_intent::adapters::mock::{BankBehavior, MockBank, MockLedger};
    use crate::payment_intent::{EngineConfig, InMemoryPaymentStore, PaymentIntentEngine};
    use auth::ACTOR_HEADER;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    struct TestApp {
        app: Router,
        bank: Arc<MockBank>,
        dlq: Arc<InMemoryDlqStore>,
    }

    fn test_app() -> TestApp {
        let bank = Arc::new(MockBank::new());
        let engine = PaymentIntentEngine::new(
            Arc::new(InMemoryPaymentStore::new()),
            bank.clone(),
            Arc::new(MockLedger::new()),
            EventPublisher::new(Arc::new(RecordingBus::new())),
            Arc::new(RecordingPubSub::new()),
            EngineConfig::default(),
        );
        let dlq = Arc::new(InMemoryDlqStore::new(DlqConfig::default()));
        let state = Arc::new(AppState::new(engine, dlq.clone(), None));
        let app = router(
            state,
            IdempotencyLayer::new(Arc::new(InMemoryIdempotencyStore::new())),
        );
        TestApp { app, bank, dlq }
    }

    fn post_json(uri: &str, actor: Option<&str>, key: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(a) = actor {
            builder = builder.header(ACTOR_HEADER, a);
        }
        if let Some(k) = key {
            builder = builder.header(IDEMPOTENCY_KEY_HEADER, k);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn create(app: &Router) -> String {
        let (status, body) = send(
            app,
            post_json(
                "/v1/payment_intents",
                Some("merchant_1"),
                None,
                json!({"zone_id": "zone_a", "amount": 1000, "currency": "usd", "user_id": "cus_1"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["data"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_create_confirm_and_replay() {
        let t = test_app();
        let id = create(&t.app).await;
        let uri = format!("/v1/payment_intents/{}/confirm", id);
        let body = json!({"payment_method": "pm_card_visa"});

        let (status, first) = send(
            &t.app,
            post_json(&uri, Some("merchant_1"), Some("confirm-1"), body.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["data"]["status"], "succeeded");

        let (status, replay) =
            send(&t.app, post_json(&uri, Some("merchant_1"), Some("confirm-1"), body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(replay, first);
        assert_eq!(t.bank.charge_count(), 1);

        let (status, fetched) = send(&t.app, get_req(&format!("/v1/payment_intents/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["data"]["status"], "succeeded");
    }

    #[tokio::test]
    async fn test_second_confirm_without_key_is_already_processed() {
        let t = test_app();
        let id = create(&t.app).await;
        let uri = format!("/v1/payment_intents/{}/confirm", id);
        let body = json!({"payment_method": "pm_card_visa"});

        send(&t.app, post_json(&uri, Some("merchant_1"), None, body.clone())).await;
        let (status, _) = send(&t.app, post_json(&uri, Some("merchant_1"), None, body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(t.bank.charge_count(), 1);
    }

    #[tokio::test]
    async fn test_decline_is_402_with_code() {
        let t = test_app();
        t.bank.set_behavior(BankBehavior::Decline("insufficient_funds"));
        let id = create(&t.app).await;

        let (status, body) = send(
            &t.app,
            post_json(
                &format!("/v1/payment_intents/{}/confirm", id),
                Some("merchant_1"),
                Some("k"),
                json!({"payment_method": "pm_card_visa"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["data"]["decline_code"], "insufficient_funds");
    }

    #[tokio::test]
    async fn test_bank_outage_is_retryable_under_same_key() {
        let t = test_app();
        t.bank.set_behavior(BankBehavior::Unavailable);
        let id = create(&t.app).await;
        let uri = format!("/v1/payment_intents/{}/confirm", id);
        let body = json!({"payment_method": "pm_card_visa"});

        let (status, _) =
            send(&t.app, post_json(&uri, Some("merchant_1"), Some("k"), body.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        t.bank.set_behavior(BankBehavior::Approve);
        let (status, retried) =
            send(&t.app, post_json(&uri, Some("merchant_1"), Some("k"), body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(retried["data"]["status"], "succeeded");
    }

    #[tokio::test]
    async fn test_idempotency_key_requires_actor() {
        let t = test_app();
        let (status, _) = send(
            &t.app,
            post_json(
                "/v1/payment_intents",
                None,
                Some("k"),
                json!({"zone_id": "zone_a", "amount": 1000, "currency": "usd", "user_id": "cus_1"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_body_and_ids() {
        let t = test_app();
        let (status, _) = send(
            &t.app,
            post_json(
                "/v1/payment_intents",
                Some("merchant_1"),
                None,
                json!({"zone_id": "zone_a", "amount": -5, "currency": "usd", "user_id": "cus_1"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&t.app, get_req("/v1/payment_intents/not-an-id")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_dlq_admin_routes() {
        let t = test_app();
        let entry = t
            .dlq
            .add(NewDlqEntry {
                task_id: "evt_1.sub_1".into(),
                zone_id: "zone_a".into(),
                url: "http://hooks.test".into(),
                payload: b"{}".to_vec(),
                headers: Vec::new(),
                failure_reason: "unexpected status 500".into(),
                last_status_code: Some(500),
            })
            .await
            .unwrap();

        let (status, list) = send(&t.app, get_req("/v1/dlq?status=pending")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["data"].as_array().unwrap().len(), 1);

        let (status, _) = send(&t.app, get_req("/v1/dlq?status=bogus")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let abandon = format!("/v1/dlq/{}/abandon", entry.id);
        let (status, body) = send(&t.app, post_json(&abandon, None, None, json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "abandoned");

        let (status, _) = send(&t.app, post_json(&abandon, None, None, json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let replay = format!("/v1/dlq/{}/replay", entry.id);
        let (status, body) = send(&t.app, post_json(&replay, None, None, json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "pending");

        let (status, stats) = send(&t.app, get_req("/v1/dlq/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["data"]["pending"], 1);
    }

    #[tokio::test]
    async fn test_health_without_database() {
        let t = test_app();
        let (status, body) = send(&t.app, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["database"], "in-memory");
    }
}
