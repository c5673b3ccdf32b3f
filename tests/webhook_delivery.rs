//! Confirm a payment and receive the signed webhook over real HTTP

mod common;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::WebhookReceiver;
use payrail::Mode;
use payrail::delivery::signing::{DELIVERY_ID_HEADER, EVENT_TYPE_HEADER, SIGNATURE_HEADER};
use payrail::delivery::{
    BackoffPolicy, ChannelNotifier, DeliveryConfig, DeliveryWorker, InMemoryDedupStore,
    PubSubChannelSender, ReqwestTransport,
};
use payrail::dlq::{DlqConfig, DlqFilter, DlqStatus, DlqStore, InMemoryDlqStore};
use payrail::events::{BroadcastPubSub, EventPublisher, NotificationRouter, PartitionedEventBus};
use payrail::payment_intent::{
    AdapterError, BankGateway, ChargeResult, CreatePaymentIntent, EngineConfig,
    InMemoryPaymentStore, LedgerLeg, LedgerReceipt, LedgerService, PaymentIntentEngine,
    PaymentIntentStatus,
};
use payrail::subscriptions::{SubscriptionRegistry, SubscriptionSet};

const SECRET: &str = "whsec_e2e";

struct ApprovingBank;

#[async_trait]
impl BankGateway for ApprovingBank {
    fn name(&self) -> &'static str {
        "approving"
    }

    async fn charge(
        &self,
        _amount: i64,
        _currency: &str,
        _payment_method_token: &str,
        reference: &str,
    ) -> Result<ChargeResult, AdapterError> {
        Ok(ChargeResult::Approved {
            charge_id: format!("ch_{}", reference),
        })
    }
}

#[derive(Default)]
struct RecordingLedger {
    legs: Mutex<Vec<LedgerLeg>>,
}

#[async_trait]
impl LedgerService for RecordingLedger {
    async fn record_transaction(&self, leg: &LedgerLeg) -> Result<LedgerReceipt, AdapterError> {
        self.legs.lock().unwrap().push(leg.clone());
        Ok(LedgerReceipt {
            transaction_id: format!("txn_{}", leg.reference_id),
            status: "posted".into(),
        })
    }
}

fn hmac_hex(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

struct Service {
    engine: PaymentIntentEngine,
    ledger: Arc<RecordingLedger>,
    dlq: Arc<InMemoryDlqStore>,
    cancel: CancellationToken,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Service {
    fn start(hook_url: &str, max_retries: u32) -> Self {
        let subscriptions = SubscriptionSet::from_json(&format!(
            r#"{{"subscriptions":[{{"id":"sub_e2e","zone_id":"zone_e2e",
                "event_types":["payment.succeeded"],"type":"webhook",
                "url":"{}","secret":"{}"}}]}}"#,
            hook_url, SECRET
        ))
        .unwrap();

        let (bus, partitions) = PartitionedEventBus::new(4, 64);
        let pubsub = Arc::new(BroadcastPubSub::new(64));
        let ledger = Arc::new(RecordingLedger::default());
        let engine = PaymentIntentEngine::new(
            Arc::new(InMemoryPaymentStore::new()),
            Arc::new(ApprovingBank),
            ledger.clone(),
            EventPublisher::new(Arc::new(bus)),
            pubsub.clone(),
            EngineConfig::default(),
        );

        let dedup = Arc::new(InMemoryDedupStore::new());
        let backoff = BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(50));
        let worker = Arc::new(DeliveryWorker::new(
            Arc::new(ReqwestTransport::new(Duration::from_secs(5)).unwrap()),
            dedup.clone(),
            DeliveryConfig {
                max_retries,
                backoff,
                ..DeliveryConfig::default()
            },
        ));
        let notifier = Arc::new(ChannelNotifier::new(
            Arc::new(PubSubChannelSender::new(pubsub)),
            dedup,
            Duration::from_secs(60),
            backoff,
        ));
        let dlq = Arc::new(InMemoryDlqStore::new(DlqConfig::default()));
        let router = Arc::new(NotificationRouter::new(
            Arc::new(SubscriptionRegistry::new(subscriptions)),
            worker,
            notifier,
            dlq.clone(),
        ));

        let cancel = CancellationToken::new();
        let handles = router.spawn(partitions, cancel.clone());
        Self {
            engine,
            ledger,
            dlq,
            cancel,
            handles,
        }
    }

    async fn pay(&self, amount: i64) -> payrail::PaymentIntent {
        let intent = self
            .engine
            .create(CreatePaymentIntent {
                zone_id: "zone_e2e".into(),
                mode: Mode::Test,
                amount,
                currency: "EUR".into(),
                description: None,
                user_id: "cus_e2e".into(),
                application_fee_amount: None,
                on_behalf_of: None,
            })
            .await
            .unwrap();
        self.engine
            .confirm(&intent.id, "pm_card", &CancellationToken::new())
            .await
            .unwrap()
    }

    async fn stop(self) {
        self.cancel.cancel();
        for handle in self.handles {
            handle.await.unwrap();
        }
    }
}

#[tokio::test]
async fn test_confirmed_payment_reaches_merchant_with_valid_signature() {
    let receiver = WebhookReceiver::start(&[], 200).await;
    let service = Service::start(&receiver.url, 3);

    let intent = service.pay(1000).await;
    assert_eq!(intent.status, PaymentIntentStatus::Succeeded);
    assert_eq!(service.ledger.legs.lock().unwrap().len(), 1);

    let got = receiver.wait_for(1).await;
    let hook = &got[0];
    assert_eq!(hook.header(EVENT_TYPE_HEADER), Some("payment.succeeded"));
    assert_eq!(
        hook.header(SIGNATURE_HEADER),
        Some(hmac_hex(SECRET, &hook.body).as_str())
    );
    let delivery_id = hook.header(DELIVERY_ID_HEADER).unwrap();
    assert!(delivery_id.ends_with(".sub_e2e"));

    let body: serde_json::Value = serde_json::from_slice(&hook.body).unwrap();
    assert_eq!(body["payload"]["id"], intent.id.to_string());

    service.stop().await;
}

#[tokio::test]
async fn test_merchant_outage_is_retried_then_delivered() {
    let receiver = WebhookReceiver::start(&[503, 500], 200).await;
    let service = Service::start(&receiver.url, 3);

    service.pay(2500).await;

    let got = receiver.wait_for(3).await;
    // Every attempt carries the same delivery id and signature
    let ids: Vec<_> = got.iter().map(|r| r.header(DELIVERY_ID_HEADER)).collect();
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert!(
        got.iter()
            .all(|r| r.header(SIGNATURE_HEADER) == Some(hmac_hex(SECRET, &r.body).as_str()))
    );

    // Delivered on the third attempt, so nothing was dead-lettered
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(receiver.received().len(), 3);
    assert!(service.dlq.list(&DlqFilter::default()).await.unwrap().is_empty());

    service.stop().await;
}

#[tokio::test]
async fn test_unreachable_merchant_is_dead_lettered() {
    let receiver = WebhookReceiver::start(&[], 500).await;
    let service = Service::start(&receiver.url, 1);

    service.pay(700).await;
    receiver.wait_for(2).await;

    let dlq = service.dlq.clone();
    let entry = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let entries = dlq.list(&DlqFilter::default()).await.unwrap();
            if let Some(entry) = entries.into_iter().next() {
                return entry;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(entry.status, DlqStatus::Pending);
    assert_eq!(entry.url, receiver.url);
    assert_eq!(entry.last_status_code, Some(500));

    service.stop().await;
}
