//! Event Publisher
//!
//! Serializes an event once and publishes the bytes under its partition
//! key. Delivery is at-least-once; consumers deduplicate on event id.

use std::sync::Arc;
use tracing::debug;

use super::bus::{BusError, EventBus};
use super::types::Event;

#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    pub async fn publish(&self, event: &Event) -> Result<(), BusError> {
        let key = event.partition_key();
        let bytes = serde_json::to_vec(event)?;
        self.bus.publish(&key, bytes).await?;
        debug!(event_id = %event.id, event_type = %event.event_type, partition_key = %key, "Event published");
        Ok(())
    }
}
