//! Delivery Worker
//!
//! Signed webhook delivery with a dedup gate and bounded exponential
//! retry, plus unsigned channel notifications.

pub mod backoff;
pub mod channel;
pub mod dedup;
pub mod error;
pub mod signing;
pub mod transport;
pub mod types;
pub mod worker;

pub use backoff::BackoffPolicy;
pub use channel::{ChannelNotifier, ChannelOutcome, ChannelSender, PubSubChannelSender};
pub use dedup::{DedupStore, InMemoryDedupStore, PgDedupStore, sent_key};
pub use error::{DeliveryError, ExhaustedError};
pub use transport::{ReqwestTransport, TransportError, WebhookTransport};
pub use types::{ChannelNotification, DeliveryReport, DeliveryTask};
pub use worker::{AttemptOutcome, DeliveryConfig, DeliveryWorker, classify};
