//! Subscription registry
//!
//! Subscriptions live in a JSON file and are held as an immutable
//! snapshot. Readers clone the `Arc` and never see a half-applied reload.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core_types::ZoneId;
use crate::events::EventType;

pub const WILDCARD: &str = "*";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("failed to read subscriptions: {0}")]
    Io(String),

    #[error("failed to parse subscriptions: {0}")]
    Parse(String),

    #[error("invalid subscription {id}: {reason}")]
    Invalid { id: String, reason: String },
}

/// Where matching events go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionTarget {
    Webhook {
        url: String,
        #[serde(default)]
        secret: Option<String>,
        /// Overrides the worker's default retry budget
        #[serde(default)]
        max_retries: Option<u32>,
    },
    Channel { channel: String, recipient: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub zone_id: ZoneId,
    /// Event type names, or `*` for all
    pub event_types: Vec<String>,
    #[serde(flatten)]
    pub target: SubscriptionTarget,
}

impl Subscription {
    pub fn matches(&self, zone_id: &str, event_type: EventType) -> bool {
        self.zone_id == zone_id
            && self
                .event_types
                .iter()
                .any(|t| t == WILDCARD || t == event_type.as_str())
    }

    fn validate(&self) -> Result<(), SubscriptionError> {
        let invalid = |reason: &str| SubscriptionError::Invalid {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id is empty"));
        }
        if self.zone_id.trim().is_empty() {
            return Err(invalid("zone_id is empty"));
        }
        if self.event_types.is_empty() {
            return Err(invalid("no event types"));
        }
        for t in &self.event_types {
            if t != WILDCARD && t.parse::<EventType>().is_err() {
                return Err(invalid(&format!("unknown event type {}", t)));
            }
        }
        match &self.target {
            SubscriptionTarget::Webhook { url, .. } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(invalid("webhook url must be http(s)"));
                }
            }
            SubscriptionTarget::Channel { channel, recipient } => {
                if channel.trim().is_empty() || recipient.trim().is_empty() {
                    return Err(invalid("channel and recipient are required"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSet {
    pub subscriptions: Vec<Subscription>,
}

impl SubscriptionSet {
    /// Parse and validate a JSON document; ids must be unique
    pub fn from_json(content: &str) -> Result<Self, SubscriptionError> {
        let set: SubscriptionSet =
            serde_json::from_str(content).map_err(|e| SubscriptionError::Parse(e.to_string()))?;

        let mut seen = HashSet::new();
        for sub in &set.subscriptions {
            sub.validate()?;
            if !seen.insert(sub.id.as_str()) {
                return Err(SubscriptionError::Invalid {
                    id: sub.id.clone(),
                    reason: "duplicate id".to_string(),
                });
            }
        }
        Ok(set)
    }

    pub fn load(path: &Path) -> Result<Self, SubscriptionError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SubscriptionError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    pub fn matching(
        &self,
        zone_id: &str,
        event_type: EventType,
    ) -> impl Iterator<Item = &Subscription> {
        self.subscriptions
            .iter()
            .filter(move |s| s.matches(zone_id, event_type))
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

/// Current subscription snapshot, swapped whole on reload
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    current: RwLock<Arc<SubscriptionSet>>,
}

impl SubscriptionRegistry {
    pub fn new(set: SubscriptionSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(set)),
        }
    }

    pub async fn snapshot(&self) -> Arc<SubscriptionSet> {
        self.current.read().await.clone()
    }

    pub async fn replace(&self, set: SubscriptionSet) {
        *self.current.write().await = Arc::new(set);
    }
}
