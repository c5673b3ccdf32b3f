//! Durable event bus and low-latency pub/sub.
//!
//! The bundled bus is an in-process stand-in for a log-structured broker:
//! records are routed by CRC32 of their partition key to one of N bounded
//! channels, and each channel is consumed by a single task, so records
//! sharing a key are seen in publish order.
//!
//! Publishing never waits longer than the configured timeout: a partition
//! that stays full is reported as [`BusError::Unavailable`].

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{broadcast, mpsc};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("partition {0} is closed")]
    Closed(usize),

    #[error("event encoding failed: {0}")]
    Encode(String),

    #[error("bus unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for BusError {
    fn from(e: serde_json::Error) -> Self {
        BusError::Encode(e.to_string())
    }
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, partition_key: &str, payload: Vec<u8>) -> Result<(), BusError>;
}

/// Fire-and-forget channel for live streaming
pub trait PubSub: Send + Sync {
    fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BusError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusRecord {
    pub partition_key: String,
    pub payload: Vec<u8>,
}

pub fn partition_for(key: &str, partitions: usize) -> usize {
    crc32fast::hash(key.as_bytes()) as usize % partitions.max(1)
}

const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_millis(500);

pub struct PartitionedEventBus {
    partitions: Vec<mpsc::Sender<BusRecord>>,
    publish_timeout: Duration,
}

impl PartitionedEventBus {
    /// Bus plus one receiver per partition
    pub fn new(partitions: usize, capacity: usize) -> (Self, Vec<mpsc::Receiver<BusRecord>>) {
        let (senders, receivers) = (0..partitions.max(1))
            .map(|_| mpsc::channel(capacity.max(1)))
            .unzip();
        (
            Self {
                partitions: senders,
                publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            },
            receivers,
        )
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }
}

#[async_trait]
impl EventBus for PartitionedEventBus {
    async fn publish(&self, partition_key: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let partition = partition_for(partition_key, self.partitions.len());
        let record = BusRecord {
            partition_key: partition_key.to_string(),
            payload,
        };
        match self.partitions[partition]
            .send_timeout(record, self.publish_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Closed(_)) => Err(BusError::Closed(partition)),
            Err(SendTimeoutError::Timeout(_)) => Err(BusError::Unavailable(format!(
                "partition {} full for {:?}",
                partition, self.publish_timeout
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

/// Lossy broadcast: slow subscribers miss messages, no subscribers is fine
pub struct BroadcastPubSub {
    tx: broadcast::Sender<PubSubMessage>,
}

impl BroadcastPubSub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PubSubMessage> {
        self.tx.subscribe()
    }
}

impl PubSub for BroadcastPubSub {
    fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let receivers = self
            .tx
            .send(PubSubMessage {
                channel: channel.to_string(),
                payload,
            })
            .unwrap_or(0);
        tracing::trace!(channel, receivers, "pubsub publish");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_is_stable() {
        let a = partition_for("pi_01HZY", 8);
        assert_eq!(a, partition_for("pi_01HZY", 8));
        assert!(a < 8);
        assert_eq!(partition_for("anything", 1), 0);
        assert_eq!(partition_for("anything", 0), 0);
    }

    #[tokio::test]
    async fn test_same_key_keeps_order() {
        let (bus, mut receivers) = PartitionedEventBus::new(4, 64);
        for i in 0..10u8 {
            bus.publish("pi_same", vec![i]).await.unwrap();
        }
        let partition = partition_for("pi_same", 4);
        let rx = &mut receivers[partition];
        for i in 0..10u8 {
            let record = rx.recv().await.unwrap();
            assert_eq!(record.payload, vec![i]);
            assert_eq!(record.partition_key, "pi_same");
        }
    }

    #[tokio::test]
    async fn test_closed_partition() {
        let (bus, receivers) = PartitionedEventBus::new(1, 1);
        drop(receivers);
        assert_eq!(
            bus.publish("k", vec![1]).await,
            Err(BusError::Closed(0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_partition_times_out() {
        let (bus, _receivers) = PartitionedEventBus::new(1, 1);
        let bus = bus.with_publish_timeout(Duration::from_millis(50));
        bus.publish("k", vec![1]).await.unwrap();

        let started = tokio::time::Instant::now();
        let err = bus.publish("k", vec![2]).await.unwrap_err();
        assert!(matches!(err, BusError::Unavailable(_)));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_ok() {
        let pubsub = BroadcastPubSub::new(4);
        assert!(pubsub.publish("payments", vec![1]).is_ok());

        let mut rx = pubsub.subscribe();
        pubsub.publish("payments", vec![2]).unwrap();
        assert_eq!(rx.recv().await.unwrap().payload, vec![2]);
    }
}
