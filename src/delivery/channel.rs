//! Channel notifications (non-webhook).
//!
//! Same gate-then-send shape as webhooks, without signing. A failed send
//! is not re-enqueued inline: the next backoff is computed, logged and
//! returned to the caller as advisory.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::backoff::BackoffPolicy;
use super::dedup::{DedupStore, sent_key};
use super::error::DeliveryError;
use super::types::ChannelNotification;
use crate::events::PubSub;

#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, notification: &ChannelNotification) -> Result<(), String>;
}

/// Publishes to the pub/sub channel `notifications:<recipient>`
pub struct PubSubChannelSender {
    pubsub: Arc<dyn PubSub>,
}

impl PubSubChannelSender {
    pub fn new(pubsub: Arc<dyn PubSub>) -> Self {
        Self { pubsub }
    }

    pub fn topic(recipient: &str) -> String {
        format!("notifications:{}", recipient)
    }
}

#[async_trait]
impl ChannelSender for PubSubChannelSender {
    async fn send(&self, notification: &ChannelNotification) -> Result<(), String> {
        self.pubsub
            .publish(
                &Self::topic(&notification.recipient),
                notification.payload.clone(),
            )
            .map_err(|e| e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOutcome {
    Sent,
    Deduplicated,
}

pub struct ChannelNotifier {
    sender: Arc<dyn ChannelSender>,
    dedup: Arc<dyn DedupStore>,
    ttl: Duration,
    backoff: BackoffPolicy,
}

impl ChannelNotifier {
    pub fn new(
        sender: Arc<dyn ChannelSender>,
        dedup: Arc<dyn DedupStore>,
        ttl: Duration,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            sender,
            dedup,
            ttl,
            backoff,
        }
    }

    pub async fn notify(
        &self,
        notification: &ChannelNotification,
    ) -> Result<ChannelOutcome, DeliveryError> {
        let key = sent_key(&notification.id);
        if self.dedup.is_sent(&key).await? {
            debug!(task_id = %notification.id, "Notification already sent, skipping");
            return Ok(ChannelOutcome::Deduplicated);
        }

        match self.sender.send(notification).await {
            Ok(()) => {
                if let Err(e) = self.dedup.mark_sent(&key, self.ttl).await {
                    warn!(task_id = %notification.id, error = %e, "Failed to record dedup key");
                }
                info!(
                    task_id = %notification.id,
                    channel = %notification.channel,
                    recipient = %notification.recipient,
                    "Notification sent"
                );
                Ok(ChannelOutcome::Sent)
            }
            Err(reason) => {
                let next_backoff = self.backoff.delay_for(notification.retry_count + 1);
                warn!(
                    task_id = %notification.id,
                    channel = %notification.channel,
                    error = %reason,
                    next_backoff_ms = next_backoff.as_millis() as u64,
                    "Notification failed; retry is advisory only"
                );
                Err(DeliveryError::Channel {
                    task_id: notification.id.clone(),
                    reason,
                    next_backoff,
                })
            }
        }
    }
}
