//! Service assembly
//!
//! Builds every component from [`AppConfig`]: PostgreSQL-backed stores
//! when `postgres_url` is set, in-memory stores otherwise. The binary
//! spawns the background loops and serves the gateway on top.

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{AppConfig, PostingMode};
use crate::config_watcher::SubscriptionWatcher;
use crate::db::Database;
use crate::delivery::{
    ChannelNotifier, DedupStore, DeliveryError, DeliveryWorker, InMemoryDedupStore, PgDedupStore,
    PubSubChannelSender, ReqwestTransport,
};
use crate::dlq::{DlqStore, DlqSweeper, InMemoryDlqStore, PgDlqStore};
use crate::events::{
    BroadcastPubSub, BusRecord, EventPublisher, NotificationRouter, PartitionedEventBus,
};
use crate::gateway::{self, state::AppState};
use crate::idempotency::{
    IdempotencyLayer, IdempotencyStore, InMemoryIdempotencyStore, PgIdempotencyStore,
};
use crate::payment_intent::{
    EngineConfig, HttpBankGateway, HttpLedgerClient, InMemoryPaymentStore, LedgerOutboxStore,
    OutboxConfig, OutboxDispatcher, PaymentIntentEngine, PaymentIntentStore, PgPaymentStore,
};
use crate::subscriptions::{SubscriptionRegistry, SubscriptionSet};

/// Dedup backends expire differently
enum DedupPurge {
    Memory(Arc<InMemoryDedupStore>),
    Postgres(Arc<PgDedupStore>),
}

impl DedupPurge {
    async fn purge(&self) -> Result<u64, DeliveryError> {
        match self {
            DedupPurge::Memory(store) => Ok(store.purge_expired() as u64),
            DedupPurge::Postgres(store) => store.purge_expired().await,
        }
    }
}

/// Fully wired pipeline, ready to spawn
pub struct Pipeline {
    pub engine: PaymentIntentEngine,
    pub dlq: Arc<dyn DlqStore>,
    pub registry: Arc<SubscriptionRegistry>,
    pub pubsub: Arc<BroadcastPubSub>,
    pub db: Option<Arc<Database>>,
    idempotency: IdempotencyLayer,
    router: Arc<NotificationRouter>,
    sweeper: Arc<DlqSweeper>,
    outbox: Option<Arc<OutboxDispatcher>>,
    dedup: DedupPurge,
    partitions: Vec<mpsc::Receiver<BusRecord>>,
    subscriptions_loaded_at: Option<SystemTime>,
    config: AppConfig,
}

impl Pipeline {
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let db = match &config.postgres_url {
            Some(url) => {
                let db = Database::connect(url, &config.postgres_pool)
                    .await
                    .context("Failed to connect to PostgreSQL")?;
                db.migrate().await.context("Failed to apply migrations")?;
                Some(Arc::new(db))
            }
            None => {
                warn!("postgres_url not set, running on in-memory stores");
                None
            }
        };

        let dlq_config = config.dlq.to_dlq_config();
        let delivery_config = config.delivery.to_delivery_config();

        let (payments, outbox_store, idempotency_store, dedup, dlq): (
            Arc<dyn PaymentIntentStore>,
            Arc<dyn LedgerOutboxStore>,
            Arc<dyn IdempotencyStore>,
            DedupPurge,
            Arc<dyn DlqStore>,
        ) = match &db {
            Some(db) => {
                let pool = db.pool().clone();
                let payments = Arc::new(PgPaymentStore::new(pool.clone()));
                (
                    payments.clone(),
                    payments,
                    Arc::new(PgIdempotencyStore::new(pool.clone())),
                    DedupPurge::Postgres(Arc::new(PgDedupStore::new(pool.clone()))),
                    Arc::new(PgDlqStore::new(pool, dlq_config.clone())),
                )
            }
            None => {
                let payments = Arc::new(InMemoryPaymentStore::new());
                (
                    payments.clone(),
                    payments,
                    Arc::new(InMemoryIdempotencyStore::new()),
                    DedupPurge::Memory(Arc::new(InMemoryDedupStore::new())),
                    Arc::new(InMemoryDlqStore::new(dlq_config.clone())),
                )
            }
        };
        let dedup_store: Arc<dyn DedupStore> = match &dedup {
            DedupPurge::Memory(store) => store.clone(),
            DedupPurge::Postgres(store) => store.clone(),
        };

        let bank = Arc::new(
            HttpBankGateway::new(
                config.bank.base_url.clone(),
                Duration::from_millis(config.bank.timeout_ms),
            )
            .context("Failed to build bank client")?,
        );
        let ledger = Arc::new(
            HttpLedgerClient::new(
                config.ledger.base_url.clone(),
                Duration::from_millis(config.ledger.timeout_ms),
            )
            .context("Failed to build ledger client")?,
        );

        let (bus, partitions) =
            PartitionedEventBus::new(config.events.partitions, config.events.partition_capacity);
        let bus = bus.with_publish_timeout(Duration::from_millis(config.events.publish_timeout_ms));
        let pubsub = Arc::new(BroadcastPubSub::new(config.events.pubsub_capacity));

        let engine = PaymentIntentEngine::new(
            payments,
            bank,
            ledger.clone(),
            EventPublisher::new(Arc::new(bus)),
            pubsub.clone(),
            EngineConfig {
                platform_account_id: config.ledger.platform_account_id.clone(),
                posting_mode: config.ledger.posting_mode,
            },
        );

        let outbox = (config.ledger.posting_mode == PostingMode::Outbox).then(|| {
            Arc::new(OutboxDispatcher::new(
                outbox_store,
                ledger,
                OutboxConfig {
                    poll_interval: Duration::from_millis(config.ledger.outbox_interval_ms),
                    ..OutboxConfig::default()
                },
            ))
        });

        let transport = Arc::new(
            ReqwestTransport::new(Duration::from_millis(config.delivery.request_timeout_ms))
                .context("Failed to build webhook client")?,
        );
        let worker = Arc::new(DeliveryWorker::new(
            transport,
            dedup_store.clone(),
            delivery_config.clone(),
        ));
        let notifier = Arc::new(ChannelNotifier::new(
            Arc::new(PubSubChannelSender::new(pubsub.clone())),
            dedup_store,
            delivery_config.channel_dedup_ttl,
            delivery_config.backoff.clone(),
        ));

        let subscriptions_path = PathBuf::from(&config.subscriptions.path);
        let subscriptions_loaded_at = SubscriptionWatcher::modified_at(&subscriptions_path);
        let subscriptions = match SubscriptionSet::load(&subscriptions_path) {
            Ok(set) => set,
            Err(e) => {
                warn!(error = %e, "Starting without subscriptions");
                SubscriptionSet::default()
            }
        };
        info!(count = subscriptions.len(), "Subscriptions loaded");
        let registry = Arc::new(SubscriptionRegistry::new(subscriptions));

        let router = Arc::new(
            NotificationRouter::new(registry.clone(), worker.clone(), notifier, dlq.clone())
                .with_max_lanes(config.events.max_lanes_per_partition),
        );
        let sweeper = Arc::new(DlqSweeper::new(dlq.clone(), worker, dlq_config));

        Ok(Self {
            engine,
            dlq,
            registry,
            pubsub,
            db,
            idempotency: IdempotencyLayer::new(idempotency_store),
            router,
            sweeper,
            outbox,
            dedup,
            partitions,
            subscriptions_loaded_at,
            config,
        })
    }

    pub fn http_router(&self) -> axum::Router {
        let state = Arc::new(AppState::new(
            self.engine.clone(),
            self.dlq.clone(),
            self.db.clone(),
        ));
        gateway::router(state, self.idempotency.clone())
    }

    /// Start the router consumers, sweeper, outbox, watcher and purge loops
    pub fn spawn_background(&mut self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let partitions = std::mem::take(&mut self.partitions);
        let mut handles = self.router.clone().spawn(partitions, cancel.clone());

        let sweeper = self.sweeper.clone();
        let token = cancel.clone();
        handles.push(tokio::spawn(async move { sweeper.run(token).await }));

        if let Some(outbox) = self.outbox.clone() {
            let token = cancel.clone();
            handles.push(tokio::spawn(async move { outbox.run(token).await }));
        }

        let watcher = SubscriptionWatcher::new(
            &self.config.subscriptions.path,
            self.registry.clone(),
            Duration::from_secs(self.config.subscriptions.reload_interval_secs.max(1)),
            self.subscriptions_loaded_at,
        );
        handles.push(tokio::spawn(watcher.run(cancel.clone())));

        let dedup = std::mem::replace(
            &mut self.dedup,
            DedupPurge::Memory(Arc::new(InMemoryDedupStore::new())),
        );
        handles.push(tokio::spawn(purge_loop(
            self.idempotency.store().clone(),
            self.config.idempotency.retention_secs.map(Duration::from_secs),
            dedup,
            Duration::from_secs(self.config.idempotency.purge_interval_secs.max(1)),
            cancel.clone(),
        )));

        handles
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

async fn purge_loop(
    idempotency: Arc<dyn IdempotencyStore>,
    retention: Option<Duration>,
    dedup: DedupPurge,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        if let Some(age) = retention {
            match idempotency.purge_older_than(age).await {
                Ok(0) => {}
                Ok(n) => info!(purged = n, "Idempotency records purged"),
                Err(e) => error!(error = %e, "Idempotency purge failed"),
            }
        }
        match dedup.purge().await {
            Ok(0) => {}
            Ok(n) => info!(purged = n, "Expired dedup keys purged"),
            Err(e) => error!(error = %e, "Dedup purge failed"),
        }
    }
}
