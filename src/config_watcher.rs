//! Subscription file hot-reload
//!
//! Polls the file's modification time and swaps the registry snapshot
//! when it changes. A file that fails to read or validate never replaces
//! the running configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

use crate::subscriptions::{SubscriptionRegistry, SubscriptionSet};

/// Result of one reload check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigReloadResult {
    Unchanged,
    /// New snapshot installed with this many subscriptions
    Reloaded(usize),
    /// File read failed, keeping old config
    ReadError(String),
    /// Parse or validation failed, keeping old config
    ValidationError(String),
}

pub struct SubscriptionWatcher {
    path: PathBuf,
    registry: Arc<SubscriptionRegistry>,
    interval: Duration,
    last_modified: Option<SystemTime>,
    stat_failing: bool,
}

impl SubscriptionWatcher {
    /// `loaded_at` is the mtime of the file the registry was built from
    pub fn new(
        path: impl Into<PathBuf>,
        registry: Arc<SubscriptionRegistry>,
        interval: Duration,
        loaded_at: Option<SystemTime>,
    ) -> Self {
        Self {
            path: path.into(),
            registry,
            interval,
            last_modified: loaded_at,
            stat_failing: false,
        }
    }

    pub fn modified_at(path: &std::path::Path) -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    pub async fn check_once(&mut self) -> ConfigReloadResult {
        let modified = match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => {
                let reason = format!("{}: {}", self.path.display(), e);
                if !self.stat_failing {
                    tracing::error!(
                        target: "CONFIG",
                        "Failed to stat subscriptions: {}, keeping old configuration",
                        reason
                    );
                }
                self.stat_failing = true;
                return ConfigReloadResult::ReadError(reason);
            }
        };
        self.stat_failing = false;
        if self.last_modified == Some(modified) {
            return ConfigReloadResult::Unchanged;
        }
        // A broken file is only reported once per modification
        self.last_modified = Some(modified);

        match SubscriptionSet::load(&self.path) {
            Ok(set) => {
                let count = set.len();
                self.registry.replace(set).await;
                tracing::info!(target: "CONFIG", subscriptions = count, "Subscriptions reloaded");
                ConfigReloadResult::Reloaded(count)
            }
            Err(e @ crate::subscriptions::SubscriptionError::Io(_)) => {
                tracing::error!(
                    target: "CONFIG",
                    "Failed to reload subscriptions: {}, keeping old configuration",
                    e
                );
                ConfigReloadResult::ReadError(e.to_string())
            }
            Err(e) => {
                tracing::error!(
                    target: "CONFIG",
                    "Invalid subscriptions: {}, keeping old configuration",
                    e
                );
                ConfigReloadResult::ValidationError(e.to_string())
            }
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            target: "CONFIG",
            path = %self.path.display(),
            interval_secs = self.interval.as_secs(),
            "Watching subscriptions"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            self.check_once().await;
        }
    }
}
