//! End-to-end flows: confirm -> ledger -> event bus -> router -> webhook / DLQ

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::adapters::mock::{MockBank, MockLedger};
use super::*;
use crate::core_types::Mode;
use crate::delivery::signing::{DELIVERY_ID_HEADER, SIGNATURE_HEADER, verify};
use crate::delivery::transport::mock::ScriptedTransport;
use crate::delivery::{
    BackoffPolicy, ChannelNotifier, DeliveryConfig, DeliveryWorker, InMemoryDedupStore,
    PubSubChannelSender,
};
use crate::dlq::{DlqConfig, DlqFilter, DlqStatus, DlqStore, InMemoryDlqStore};
use crate::events::bus::mock::{RecordingBus, RecordingPubSub};
use crate::events::{Event, EventPublisher, EventType, NotificationRouter, RouteReport};
use crate::subscriptions::{SubscriptionRegistry, SubscriptionSet};

const SECRET: &str = "whsec_merchant";

fn subscriptions(event_types: &str) -> SubscriptionSet {
    SubscriptionSet::from_json(&format!(
        r#"{{"subscriptions":[{{"id":"sub_merchant","zone_id":"zone_a",
            "event_types":{},"type":"webhook",
            "url":"https://merchant.test/hooks","secret":"{}"}}]}}"#,
        event_types, SECRET
    ))
    .unwrap()
}

struct Harness {
    engine: PaymentIntentEngine,
    ledger: Arc<MockLedger>,
    bus: Arc<RecordingBus>,
    router: Arc<NotificationRouter>,
    transport: Arc<ScriptedTransport>,
    dlq: Arc<InMemoryDlqStore>,
}

impl Harness {
    fn new(transport: ScriptedTransport, max_retries: u32) -> Self {
        Self::with_subscriptions(transport, max_retries, subscriptions(r#"["*"]"#))
    }

    fn with_subscriptions(
        transport: ScriptedTransport,
        max_retries: u32,
        subscriptions: SubscriptionSet,
    ) -> Self {
        let ledger = Arc::new(MockLedger::new());
        let bus = Arc::new(RecordingBus::new());
        let pubsub = Arc::new(RecordingPubSub::new());
        let engine = PaymentIntentEngine::new(
            Arc::new(InMemoryPaymentStore::new()),
            Arc::new(MockBank::new()),
            ledger.clone(),
            EventPublisher::new(bus.clone()),
            pubsub.clone(),
            EngineConfig {
                platform_account_id: "acct_platform".into(),
                ..EngineConfig::default()
            },
        );

        let transport = Arc::new(transport);
        let dedup = Arc::new(InMemoryDedupStore::new());
        let worker = Arc::new(DeliveryWorker::new(
            transport.clone(),
            dedup.clone(),
            DeliveryConfig {
                max_retries,
                ..DeliveryConfig::default()
            },
        ));
        let notifier = Arc::new(ChannelNotifier::new(
            Arc::new(PubSubChannelSender::new(pubsub)),
            dedup,
            Duration::from_secs(60),
            BackoffPolicy::default(),
        ));
        let dlq = Arc::new(InMemoryDlqStore::new(DlqConfig::default()));
        let router = Arc::new(NotificationRouter::new(
            Arc::new(SubscriptionRegistry::new(subscriptions)),
            worker,
            notifier,
            dlq.clone(),
        ));

        Self {
            engine,
            ledger,
            bus,
            router,
            transport,
            dlq,
        }
    }

    async fn confirmed(&self, amount: i64, split: Option<(&str, i64)>) -> PaymentIntent {
        let intent = self
            .engine
            .create(CreatePaymentIntent {
                zone_id: "zone_a".into(),
                mode: Mode::Live,
                amount,
                currency: "USD".into(),
                description: Some("order 42".into()),
                user_id: "cus_1".into(),
                application_fee_amount: split.map(|(_, fee)| fee),
                on_behalf_of: split.map(|(acct, _)| acct.to_string()),
            })
            .await
            .unwrap();
        self.engine
            .confirm(&intent.id, "pm_card_visa", &CancellationToken::new())
            .await
            .unwrap()
    }

    /// Route everything published so far, in publish order
    async fn drain_bus(&self) -> RouteReport {
        let mut total = RouteReport::default();
        let cancel = CancellationToken::new();
        for record in self.bus.records() {
            let r = self.router.route(&record.payload, &cancel).await;
            total.delivered += r.delivered;
            total.deduplicated += r.deduplicated;
            total.rejected += r.rejected;
            total.dead_lettered += r.dead_lettered;
        }
        total
    }
}

#[tokio::test]
async fn test_standard_payment_posts_one_leg_and_delivers_signed_webhook() {
    let h = Harness::new(ScriptedTransport::always(200), 5);
    let intent = h.confirmed(1000, None).await;
    assert_eq!(intent.status, PaymentIntentStatus::Succeeded);

    let legs = h.ledger.legs();
    assert_eq!(legs.len(), 1);
    assert_eq!(legs[0].account_id, "cus_1");
    assert_eq!(legs[0].amount, 1000);
    assert_eq!(legs[0].reference_id, intent.id.to_string());

    let records = h.bus.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].partition_key, intent.id.to_string());
    let event: Event = serde_json::from_slice(&records[0].payload).unwrap();
    assert_eq!(event.event_type, EventType::PaymentSucceeded);

    let report = h.drain_bus().await;
    assert_eq!(report.delivered, 1);

    let call = &h.transport.calls()[0];
    assert_eq!(call.url, "https://merchant.test/hooks");
    assert_eq!(call.body, records[0].payload);
    assert!(verify(SECRET, &call.body, call.header(SIGNATURE_HEADER).unwrap()));
    assert_eq!(
        call.header(DELIVERY_ID_HEADER),
        Some(format!("{}.sub_merchant", event.id).as_str())
    );
}

#[tokio::test]
async fn test_split_payment_posts_three_balanced_legs() {
    let h = Harness::new(ScriptedTransport::always(200), 5);
    let intent = h.confirmed(5000, Some(("acct_1", 500))).await;
    assert_eq!(intent.status, PaymentIntentStatus::Succeeded);

    let legs: Vec<(String, i64)> = h
        .ledger
        .legs()
        .into_iter()
        .map(|l| (l.account_id, l.amount))
        .collect();
    assert_eq!(
        legs,
        vec![
            ("acct_1".to_string(), 4500),
            ("acct_platform".to_string(), 500),
            ("cus_1".to_string(), -5000),
        ]
    );
    assert_eq!(legs.iter().map(|(_, a)| a).sum::<i64>(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retry_with_backoff_until_delivered() {
    let h = Harness::new(ScriptedTransport::statuses(&[500, 500], 200), 5);
    h.confirmed(1000, None).await;

    let started = tokio::time::Instant::now();
    let report = h.drain_bus().await;
    assert_eq!(report.delivered, 1);
    assert_eq!(h.transport.call_count(), 3);
    // 1s then 2s between the three attempts
    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert!(h.dlq.list(&DlqFilter::default()).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_webhook_lands_in_dlq_pending() {
    let h = Harness::new(ScriptedTransport::always(500), 2);
    let intent = h.confirmed(1000, None).await;

    let report = h.drain_bus().await;
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(h.transport.call_count(), 3);

    let entries = h.dlq.list(&DlqFilter::default()).await.unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.status, DlqStatus::Pending);
    assert_eq!(entry.attempt_count, 1);
    assert_eq!(entry.last_status_code, Some(500));
    assert_eq!(
        entry.next_retry_at,
        Some(entry.first_failed_at + chrono::Duration::minutes(1))
    );
    let event: Event = serde_json::from_slice(&entry.payload).unwrap();
    assert_eq!(event.partition_key(), intent.id.to_string());
}

#[tokio::test]
async fn test_redelivered_event_is_not_sent_twice() {
    let h = Harness::new(ScriptedTransport::always(200), 5);
    h.confirmed(1000, None).await;

    assert_eq!(h.drain_bus().await.delivered, 1);
    let again = h.drain_bus().await;
    assert_eq!(again.delivered, 0);
    assert_eq!(again.deduplicated, 1);
    assert_eq!(h.transport.call_count(), 1);
}

#[tokio::test]
async fn test_refund_event_follows_payment_on_same_partition() {
    let h = Harness::new(ScriptedTransport::always(200), 5);
    let intent = h.confirmed(1000, None).await;
    let refund = h.engine.refund(&intent.id).await.unwrap();
    assert_eq!(refund.amount, 1000);

    let kinds: Vec<(String, EventType)> = h
        .bus
        .records()
        .iter()
        .map(|r| {
            let e: Event = serde_json::from_slice(&r.payload).unwrap();
            (r.partition_key.clone(), e.event_type)
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            (intent.id.to_string(), EventType::PaymentSucceeded),
            (intent.id.to_string(), EventType::RefundCompleted),
        ]
    );
    assert_eq!(h.drain_bus().await.delivered, 2);
}

#[tokio::test]
async fn test_filtered_subscription_skips_other_event_types() {
    let h = Harness::with_subscriptions(
        ScriptedTransport::always(200),
        5,
        subscriptions(r#"["refund.completed"]"#),
    );
    h.confirmed(1000, None).await;

    assert_eq!(h.drain_bus().await, RouteReport::default());
    assert_eq!(h.transport.call_count(), 0);
}
