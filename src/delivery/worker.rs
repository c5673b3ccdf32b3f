//! Delivery Worker
//!
//! Signed HTTP delivery with bounded in-process retry:
//! dedup gate, then up to `max_retries + 1` attempts with exponential
//! backoff between them. Exhaustion is returned to the caller, which
//! routes it into the dead letter queue.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::BackoffPolicy;
use super::dedup::{DedupStore, sent_key};
use super::error::{DeliveryError, ExhaustedError};
use super::signing::signed_headers;
use super::transport::WebhookTransport;
use super::types::{DeliveryReport, DeliveryTask};

/// Delivery worker configuration
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    pub webhook_dedup_ttl: Duration,
    pub channel_dedup_ttl: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff: BackoffPolicy::default(),
            webhook_dedup_ttl: Duration::from_secs(7 * 24 * 3600),
            channel_dedup_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

/// How one attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Delivered(u16),
    /// 429, 5xx or a transport error
    Retryable {
        status: Option<u16>,
        error: String,
    },
    /// 4xx other than 429
    Rejected(u16),
}

pub fn classify(status: u16) -> AttemptOutcome {
    match status {
        200..=299 => AttemptOutcome::Delivered(status),
        429 => AttemptOutcome::Retryable {
            status: Some(status),
            error: "rate limited".to_string(),
        },
        400..=499 => AttemptOutcome::Rejected(status),
        _ => AttemptOutcome::Retryable {
            status: Some(status),
            error: format!("unexpected status {}", status),
        },
    }
}

pub struct DeliveryWorker {
    transport: Arc<dyn WebhookTransport>,
    dedup: Arc<dyn DedupStore>,
    config: DeliveryConfig,
}

impl DeliveryWorker {
    pub fn new(
        transport: Arc<dyn WebhookTransport>,
        dedup: Arc<dyn DedupStore>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            transport,
            dedup,
            config,
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    pub fn dedup(&self) -> &Arc<dyn DedupStore> {
        &self.dedup
    }

    /// One POST, classified. Cancellation aborts the in-flight request.
    pub async fn attempt(
        &self,
        url: &str,
        headers: &[(String, String)],
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Option<AttemptOutcome> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.transport.post(url, headers, payload.to_vec()) => Some(match result {
                Ok(status) => classify(status),
                Err(e) => AttemptOutcome::Retryable { status: None, error: e.to_string() },
            }),
        }
    }

    pub async fn deliver(
        &self,
        task: &DeliveryTask,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReport, DeliveryError> {
        let key = sent_key(&task.id);
        if self.dedup.is_sent(&key).await? {
            debug!(task_id = %task.id, "Delivery already sent, skipping");
            return Ok(DeliveryReport {
                task_id: task.id.clone(),
                attempts: 0,
                status: None,
                deduplicated: true,
            });
        }

        let mut attempts = 0u32;
        let mut last_status = None;
        let mut last_error = String::new();

        for i in task.retry_count..=task.max_retries {
            if i > task.retry_count {
                let delay = self.config.backoff.delay_for(i);
                debug!(task_id = %task.id, attempt = i, delay_ms = delay.as_millis() as u64, "Backing off");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(DeliveryError::Cancelled { task_id: task.id.clone(), attempts });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let headers = signed_headers(task, Utc::now());
            let Some(outcome) = self.attempt(&task.url, &headers, &task.payload, cancel).await
            else {
                return Err(DeliveryError::Cancelled {
                    task_id: task.id.clone(),
                    attempts,
                });
            };
            attempts += 1;

            match outcome {
                AttemptOutcome::Delivered(status) => {
                    if let Err(e) = self.dedup.mark_sent(&key, self.config.webhook_dedup_ttl).await {
                        // Delivered regardless; a redelivery is tolerated by consumers
                        warn!(task_id = %task.id, error = %e, "Failed to record dedup key");
                    }
                    info!(task_id = %task.id, url = %task.url, status, attempts, "Webhook delivered");
                    return Ok(DeliveryReport {
                        task_id: task.id.clone(),
                        attempts,
                        status: Some(status),
                        deduplicated: false,
                    });
                }
                AttemptOutcome::Rejected(status) => {
                    warn!(task_id = %task.id, url = %task.url, status, "Webhook rejected, not retrying");
                    return Err(DeliveryError::Rejected {
                        task_id: task.id.clone(),
                        status,
                    });
                }
                AttemptOutcome::Retryable { status, error } => {
                    warn!(
                        task_id = %task.id,
                        attempt = i,
                        status = ?status,
                        error = %error,
                        "Webhook attempt failed"
                    );
                    last_status = status;
                    last_error = error;
                }
            }
        }

        Err(ExhaustedError {
            task_id: task.id.clone(),
            attempts,
            last_status,
            last_error,
        }
        .into())
    }
}
