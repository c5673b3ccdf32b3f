use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::delivery::{BackoffPolicy, DeliveryConfig};
use crate::dlq::{DlqConfig, RetrySchedule};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(flatten)]
    pub logging: LoggingConfig,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL; in-memory stores are used when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub postgres_pool: PoolSection,
    #[serde(default)]
    pub bank: BankSection,
    #[serde(default)]
    pub ledger: LedgerSection,
    #[serde(default)]
    pub delivery: DeliverySection,
    #[serde(default)]
    pub dlq: DlqSection,
    #[serde(default)]
    pub events: EventsSection,
    #[serde(default)]
    pub subscriptions: SubscriptionsSection,
    #[serde(default)]
    pub idempotency: IdempotencySection,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: Rotation,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    Hourly,
    Daily,
    Never,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoolSection {
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            max_connections: 20,
            acquire_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BankSection {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for BankSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9100".to_string(),
            timeout_ms: 10_000,
        }
    }
}

/// How ledger legs reach the ledger after a successful charge
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PostingMode {
    /// Post each leg right after the state commit; failures are logged
    #[default]
    Direct,
    /// Write legs to the outbox with the state commit; a dispatcher drains it
    Outbox,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerSection {
    pub base_url: String,
    pub timeout_ms: u64,
    pub platform_account_id: String,
    #[serde(default)]
    pub posting_mode: PostingMode,
    /// Outbox dispatcher poll interval
    #[serde(default = "default_outbox_interval")]
    pub outbox_interval_ms: u64,
}

fn default_outbox_interval() -> u64 {
    1_000
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9200".to_string(),
            timeout_ms: 10_000,
            platform_account_id: "platform".to_string(),
            posting_mode: PostingMode::Direct,
            outbox_interval_ms: default_outbox_interval(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeliverySection {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub webhook_dedup_ttl_secs: u64,
    pub channel_dedup_ttl_secs: u64,
}

impl Default for DeliverySection {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            request_timeout_ms: 10_000,
            webhook_dedup_ttl_secs: 7 * 24 * 3600,
            channel_dedup_ttl_secs: 24 * 3600,
        }
    }
}

impl DeliverySection {
    pub fn to_delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            max_retries: self.max_retries,
            backoff: BackoffPolicy::new(
                Duration::from_millis(self.base_delay_ms),
                Duration::from_millis(self.max_delay_ms),
            ),
            webhook_dedup_ttl: Duration::from_secs(self.webhook_dedup_ttl_secs),
            channel_dedup_ttl: Duration::from_secs(self.channel_dedup_ttl_secs),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DlqSection {
    pub max_attempts: u32,
    pub ttl_secs: u64,
    /// Retry delays by attempt index, in seconds
    pub schedule_secs: Vec<u64>,
    pub sweep_interval_secs: u64,
    pub batch_size: usize,
}

impl Default for DlqSection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            ttl_secs: 7 * 24 * 3600,
            schedule_secs: vec![60, 300, 1_800, 7_200, 21_600],
            sweep_interval_secs: 30,
            batch_size: 50,
        }
    }
}

impl DlqSection {
    pub fn to_dlq_config(&self) -> DlqConfig {
        DlqConfig {
            max_attempts: self.max_attempts,
            ttl: Duration::from_secs(self.ttl_secs),
            schedule: RetrySchedule::new(
                self.schedule_secs
                    .iter()
                    .map(|s| Duration::from_secs(*s))
                    .collect(),
            ),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            batch_size: self.batch_size,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EventsSection {
    pub partitions: usize,
    pub partition_capacity: usize,
    pub pubsub_capacity: usize,
    /// Longest a confirm waits on a full partition
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_ms: u64,
    /// Payment keys routed concurrently by one partition consumer
    #[serde(default = "default_lanes")]
    pub max_lanes_per_partition: usize,
}

fn default_publish_timeout() -> u64 {
    500
}

fn default_lanes() -> usize {
    64
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            partitions: 8,
            partition_capacity: 1_024,
            pubsub_capacity: 1_024,
            publish_timeout_ms: default_publish_timeout(),
            max_lanes_per_partition: default_lanes(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubscriptionsSection {
    pub path: String,
    pub reload_interval_secs: u64,
}

impl Default for SubscriptionsSection {
    fn default() -> Self {
        Self {
            path: "config/subscriptions.json".to_string(),
            reload_interval_secs: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct IdempotencySection {
    /// Records older than this are purged; `None` keeps them forever
    #[serde(default)]
    pub retention_secs: Option<u64>,
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

fn default_purge_interval() -> u64 {
    3_600
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}
