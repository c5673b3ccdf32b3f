//! Delivery task types

use serde::{Deserialize, Serialize};

use crate::core_types::ZoneId;

/// One signed webhook delivery handed to the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryTask {
    /// `<event id>.<subscription id>`; also the dedup gate key
    pub id: String,
    pub zone_id: ZoneId,
    pub url: String,
    /// Exact bytes POSTed and signed
    pub payload: Vec<u8>,
    /// HMAC key; `None` sends an empty signature
    pub secret: Option<String>,
    pub event_type: String,
    /// Attempts already spent before this hand-off
    pub retry_count: u32,
    pub max_retries: u32,
}

impl DeliveryTask {
    pub fn new(
        id: impl Into<String>,
        zone_id: impl Into<ZoneId>,
        url: impl Into<String>,
        payload: Vec<u8>,
        event_type: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            id: id.into(),
            zone_id: zone_id.into(),
            url: url.into(),
            payload,
            secret: None,
            event_type: event_type.into(),
            retry_count: 0,
            max_retries,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }
}

/// A non-webhook notification for one recipient on a named channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelNotification {
    pub id: String,
    pub zone_id: ZoneId,
    pub channel: String,
    pub recipient: String,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub retry_count: u32,
}

/// Successful outcome of `deliver`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub task_id: String,
    /// Network attempts made; zero when the dedup gate short-circuited
    pub attempts: u32,
    pub status: Option<u16>,
    pub deduplicated: bool,
}
