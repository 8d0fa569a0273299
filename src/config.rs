//! Endpoint configuration.
//!
//! Both configs deserialize from JSON with every field optional; durations
//! are given in milliseconds.
//!
//! # Example
//!
//! ```
//! use duplexwire::config::{ClientConfig, FramingConfig};
//!
//! let config = ClientConfig::from_json_str(r#"{
//!     "auto_reconnect": true,
//!     "reconnect_interval_ms": 500,
//!     "framing": { "type": "end_mark", "end_mark": "\r\n" }
//! }"#).unwrap();
//!
//! assert!(config.auto_reconnect);
//! assert!(matches!(config.framing, FramingConfig::EndMark { .. }));
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::{EndMarkSplitter, LengthPrefixSplitter, PacketSplitter, DEFAULT_MAX_PAYLOAD_SIZE};

/// Default reconnect backoff.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(2);

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default RPC call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Framing strategy selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FramingConfig {
    /// 4-byte big-endian length prefix.
    LengthPrefix {
        #[serde(default = "default_max_payload")]
        max_payload_size: u32,
    },
    /// Text marker after every message.
    EndMark {
        end_mark: String,
        #[serde(default)]
        include_end_mark: bool,
        #[serde(default = "default_true")]
        use_make_packet: bool,
    },
}

fn default_max_payload() -> u32 {
    DEFAULT_MAX_PAYLOAD_SIZE
}

fn default_true() -> bool {
    true
}

impl Default for FramingConfig {
    fn default() -> Self {
        FramingConfig::LengthPrefix {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl FramingConfig {
    /// Build the configured splitter.
    ///
    /// # Errors
    ///
    /// Fails for an empty end mark.
    pub fn build(&self) -> Result<Arc<dyn PacketSplitter>> {
        match self {
            FramingConfig::LengthPrefix { max_payload_size } => {
                Ok(Arc::new(LengthPrefixSplitter::with_max_payload(*max_payload_size)))
            }
            FramingConfig::EndMark {
                end_mark,
                include_end_mark,
                use_make_packet,
            } => Ok(Arc::new(
                EndMarkSplitter::new(end_mark.as_bytes().to_vec(), *include_end_mark)?
                    .use_make_packet(*use_make_packet),
            )),
        }
    }
}

/// Client endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Reconnect after an unexpected drop.
    pub auto_reconnect: bool,
    /// Wait between reconnect attempts.
    pub reconnect_interval_ms: u64,
    /// Timeout for each connect attempt.
    pub connect_timeout_ms: u64,
    /// RPC call deadline; `None` waits until a response or disconnect.
    pub call_timeout_ms: Option<u64>,
    /// Framing strategy.
    pub framing: FramingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: false,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL.as_millis() as u64,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            call_timeout_ms: Some(DEFAULT_CALL_TIMEOUT.as_millis() as u64),
            framing: FramingConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parse from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Enable or disable auto-reconnect.
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the reconnect backoff.
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the per-attempt connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set or clear the RPC call timeout.
    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    /// Select the framing strategy.
    pub fn framing(mut self, framing: FramingConfig) -> Self {
        self.framing = framing;
        self
    }

    pub fn reconnect_interval_duration(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn call_timeout_duration(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

/// Server endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Process group control frames.
    pub enable_group: bool,
    /// Let clients transmit to groups they are not a member of.
    pub allow_cross_group_message: bool,
    /// RPC call deadline for server-initiated calls.
    pub call_timeout_ms: Option<u64>,
    /// Framing strategy.
    pub framing: FramingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enable_group: false,
            allow_cross_group_message: false,
            call_timeout_ms: Some(DEFAULT_CALL_TIMEOUT.as_millis() as u64),
            framing: FramingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Enable or disable the group feature.
    pub fn enable_group(mut self, enabled: bool) -> Self {
        self.enable_group = enabled;
        self
    }

    /// Allow or forbid cross-group transmits.
    pub fn allow_cross_group_message(mut self, allowed: bool) -> Self {
        self.allow_cross_group_message = allowed;
        self
    }

    /// Set or clear the RPC call timeout.
    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    /// Select the framing strategy.
    pub fn framing(mut self, framing: FramingConfig) -> Self {
        self.framing = framing;
        self
    }

    pub fn call_timeout_duration(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}
