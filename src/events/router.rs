//! Notification router
//!
//! One consumer task per bus partition. Each event is matched against the
//! current subscription snapshot and fanned out to its webhook and channel
//! targets. Records are routed on a lane per partition key: a lane finishes
//! one event before starting the next for the same payment, while other
//! payments on the partition keep flowing during retry backoff.

use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bus::BusRecord;
use super::types::Event;
use crate::delivery::signing::signed_headers;
use crate::delivery::{
    ChannelNotification, ChannelNotifier, ChannelOutcome, DeliveryError, DeliveryTask,
    DeliveryWorker,
};
use crate::dlq::{DlqStore, NewDlqEntry};
use crate::subscriptions::{Subscription, SubscriptionRegistry, SubscriptionTarget};

/// What happened to one routed event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteReport {
    pub delivered: usize,
    pub deduplicated: usize,
    pub rejected: usize,
    pub dead_lettered: usize,
    pub notified: usize,
    pub failed: usize,
}

impl RouteReport {
    fn merge(&mut self, other: RouteReport) {
        self.delivered += other.delivered;
        self.deduplicated += other.deduplicated;
        self.rejected += other.rejected;
        self.dead_lettered += other.dead_lettered;
        self.notified += other.notified;
        self.failed += other.failed;
    }
}

pub struct NotificationRouter {
    registry: Arc<SubscriptionRegistry>,
    worker: Arc<DeliveryWorker>,
    notifier: Arc<ChannelNotifier>,
    dlq: Arc<dyn DlqStore>,
    max_lanes: usize,
}

impl NotificationRouter {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        worker: Arc<DeliveryWorker>,
        notifier: Arc<ChannelNotifier>,
        dlq: Arc<dyn DlqStore>,
    ) -> Self {
        Self {
            registry,
            worker,
            notifier,
            dlq,
            max_lanes: 64,
        }
    }

    /// Cap on records in flight per partition consumer
    pub fn with_max_lanes(mut self, max_lanes: usize) -> Self {
        self.max_lanes = max_lanes.max(1);
        self
    }

    /// Route one raw bus record. Undecodable records are dropped.
    pub async fn route(&self, payload: &[u8], cancel: &CancellationToken) -> RouteReport {
        let event: Event = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, bytes = payload.len(), "Dropping undecodable event");
                return RouteReport::default();
            }
        };

        let snapshot = self.registry.snapshot().await;
        let targets: Vec<&Subscription> = snapshot
            .matching(&event.zone_id, event.event_type)
            .collect();
        if targets.is_empty() {
            debug!(event_id = %event.id, zone_id = %event.zone_id, "No subscribers");
            return RouteReport::default();
        }

        let reports = join_all(
            targets
                .into_iter()
                .map(|sub| self.dispatch(&event, payload, sub, cancel)),
        )
        .await;

        let mut total = RouteReport::default();
        for report in reports {
            total.merge(report);
        }
        total
    }

    async fn dispatch(
        &self,
        event: &Event,
        payload: &[u8],
        sub: &Subscription,
        cancel: &CancellationToken,
    ) -> RouteReport {
        let task_id = format!("{}.{}", event.id, sub.id);
        let mut report = RouteReport::default();

        match &sub.target {
            SubscriptionTarget::Webhook {
                url,
                secret,
                max_retries,
            } => {
                let mut task = DeliveryTask::new(
                    task_id,
                    event.zone_id.clone(),
                    url.clone(),
                    payload.to_vec(),
                    event.event_type.as_str(),
                    max_retries.unwrap_or(self.worker.config().max_retries),
                );
                task.secret = secret.clone();

                match self.worker.deliver(&task, cancel).await {
                    Ok(r) if r.deduplicated => report.deduplicated += 1,
                    Ok(_) => report.delivered += 1,
                    Err(DeliveryError::Rejected { .. }) => report.rejected += 1,
                    Err(DeliveryError::Exhausted(e)) => {
                        let entry = NewDlqEntry {
                            task_id: task.id.clone(),
                            zone_id: task.zone_id.clone(),
                            url: task.url.clone(),
                            payload: task.payload.clone(),
                            headers: signed_headers(&task, Utc::now()),
                            failure_reason: e.last_error.clone(),
                            last_status_code: e.last_status,
                        };
                        match self.dlq.add(entry).await {
                            Ok(entry) => {
                                warn!(
                                    task_id = %task.id,
                                    dlq_id = %entry.id,
                                    attempts = e.attempts,
                                    "Delivery exhausted, moved to DLQ"
                                );
                                report.dead_lettered += 1;
                            }
                            Err(dlq_err) => {
                                error!(task_id = %task.id, error = %dlq_err, "Failed to dead-letter delivery");
                                report.failed += 1;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(task_id = %task.id, error = %e, "Delivery abandoned");
                        report.failed += 1;
                    }
                }
            }
            SubscriptionTarget::Channel { channel, recipient } => {
                let notification = ChannelNotification {
                    id: task_id,
                    zone_id: event.zone_id.clone(),
                    channel: channel.clone(),
                    recipient: recipient.clone(),
                    event_type: event.event_type.as_str().to_string(),
                    payload: payload.to_vec(),
                    retry_count: 0,
                };
                match self.notifier.notify(&notification).await {
                    Ok(ChannelOutcome::Sent) => report.notified += 1,
                    Ok(ChannelOutcome::Deduplicated) => report.deduplicated += 1,
                    // Already logged by the notifier
                    Err(_) => report.failed += 1,
                }
            }
        }
        report
    }

    async fn consume(
        self: Arc<Self>,
        partition: usize,
        mut rx: mpsc::Receiver<BusRecord>,
        cancel: CancellationToken,
    ) {
        debug!(partition, "Partition consumer started");
        let permits = Arc::new(Semaphore::new(self.max_lanes));
        // Tail task of each busy lane, keyed by partition key
        let mut lanes: HashMap<String, JoinHandle<()>> = HashMap::new();

        loop {
            let record = tokio::select! {
                _ = cancel.cancelled() => break,
                record = rx.recv() => match record {
                    Some(record) => record,
                    None => break,
                },
            };
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            lanes.retain(|_, tail| !tail.is_finished());
            let previous = lanes.remove(&record.partition_key);
            let router = self.clone();
            let token = cancel.clone();
            let key = record.partition_key.clone();
            let tail = tokio::spawn(async move {
                let _permit = permit;
                if let Some(previous) = previous {
                    let _ = previous.await;
                }
                let report = router.route(&record.payload, &token).await;
                debug!(partition, key = %record.partition_key, ?report, "Event routed");
            });
            lanes.insert(key, tail);
        }

        for (_, tail) in lanes.drain() {
            if let Err(e) = tail.await {
                error!(partition, error = %e, "Lane task failed");
            }
        }
        debug!(partition, "Partition consumer stopped");
    }

    /// One consumer task per partition receiver
    pub fn spawn(
        self: Arc<Self>,
        receivers: Vec<mpsc::Receiver<BusRecord>>,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        info!(partitions = receivers.len(), "Starting notification router");
        receivers
            .into_iter()
            .enumerate()
            .map(|(partition, rx)| {
                tokio::spawn(self.clone().consume(partition, rx, cancel.clone()))
            })
            .collect()
    }
}
