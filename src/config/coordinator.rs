//! Coordinator configuration
//!
//! Loaded from JSON (camelCase keys). Every field has a default, so an
//! empty object is a valid config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

/// Default bound on a single command round-trip (10 s)
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 10_000;

/// Default inbox size shared by intents and push events
pub const DEFAULT_INBOX_CAPACITY: usize = 256;

/// Default buffer of the change feed broadcast
pub const DEFAULT_CHANGE_FEED_CAPACITY: usize = 256;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoordinatorConfig {
    /// Bound on start/cancel/retry/cleanup/get round-trips
    pub command_timeout_ms: u64,
    /// Bounded channel carrying intents and push events
    pub inbox_capacity: usize,
    /// Lagging subscribers lose the oldest changes beyond this
    pub change_feed_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            change_feed_capacity: DEFAULT_CHANGE_FEED_CAPACITY,
        }
    }
}

impl CoordinatorConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Set custom command timeout
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.sanitized())
    }

    /// Load from a JSON file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading coordinator config from {:?}", path);
        let content = fs::read_to_string(path).await?;
        Self::from_json_str(&content)
    }

    // tokio channels panic on a zero capacity
    fn sanitized(mut self) -> Self {
        self.inbox_capacity = self.inbox_capacity.max(1);
        self.change_feed_capacity = self.change_feed_capacity.max(1);
        self
    }
}
