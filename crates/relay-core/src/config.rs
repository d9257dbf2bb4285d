//! Destination configuration.
//!
//! The destinations file is JSON with camelCase keys:
//!
//! ```json
//! {
//!   "destinations": {
//!     "graphite": { "proto": "tcp", "host": "10.0.0.5", "port": 2003 },
//!     "events": { "proto": "mqtt", "host": "broker", "topic": "events", "maxQueueLength": 50000 },
//!     "archive": { "proto": "sqs", "queueUrl": "https://queue.example/archive", "disabled": true }
//!   }
//! }
//! ```
//!
//! Keys the relay does not own are kept verbatim in [`BackendConfig::options`]
//! and handed to the transport.

use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Protocol used when a destination does not name one.
pub const DEFAULT_PROTOCOL: &str = "tcp";

/// Enough buffered messages to ride out a restart of the remote sink.
pub const DEFAULT_MAX_QUEUE_LENGTH: usize = 1_000_000;

/// Fixed delay between a connection failure and the next attempt.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 1000;

/// Number of over-bound sends between two overflow trims.
pub const DEFAULT_OVERFLOW_CHECK_INTERVAL: u32 = 100;

/// Configuration for a single destination.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Transport protocol selector (`tcp`, `udp`, `mqtt`, `sqs`, ...)
    #[serde(rename = "proto", default = "default_protocol")]
    pub protocol: String,

    /// Upper bound for the pending queue. Zero means the default.
    #[serde(
        default = "default_max_queue_length",
        deserialize_with = "non_zero_or_default"
    )]
    pub max_queue_length: usize,

    /// Disabled destinations never connect; their messages only queue up.
    #[serde(default)]
    pub disabled: bool,

    /// Delay before reconnecting after an error or a lost connection
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// How many over-bound sends may pass before the queue is trimmed again
    #[serde(default = "default_overflow_check_interval")]
    pub overflow_check_interval: u32,

    /// Protocol-specific options, passed through to the transport untouched
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl BackendConfig {
    /// Create a config for the given protocol with default settings.
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            max_queue_length: DEFAULT_MAX_QUEUE_LENGTH,
            disabled: false,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            overflow_check_interval: DEFAULT_OVERFLOW_CHECK_INTERVAL,
            options: Map::new(),
        }
    }

    /// Set a protocol-specific option.
    pub fn with_option(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    /// Reconnect delay as a duration.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PROTOCOL)
    }
}

/// Top-level relay configuration: every destination keyed by id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub destinations: BTreeMap<String, BackendConfig>,
}

impl RelayConfig {
    /// Load the configuration from a JSON file.
    pub fn load(path: &Path) -> RelayResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    /// Parse the configuration from a JSON string.
    pub fn from_json_str(raw: &str) -> RelayResult<Self> {
        serde_json::from_str(raw).map_err(|e| RelayError::Config(e.to_string()))
    }
}

fn default_protocol() -> String {
    DEFAULT_PROTOCOL.to_string()
}

fn default_max_queue_length() -> usize {
    DEFAULT_MAX_QUEUE_LENGTH
}

fn default_reconnect_interval_ms() -> u64 {
    DEFAULT_RECONNECT_INTERVAL_MS
}

fn default_overflow_check_interval() -> u32 {
    DEFAULT_OVERFLOW_CHECK_INTERVAL
}

fn non_zero_or_default<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<usize>::deserialize(deserializer)?;
    Ok(value.filter(|n| *n > 0).unwrap_or(DEFAULT_MAX_QUEUE_LENGTH))
}
