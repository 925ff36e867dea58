// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Node-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Local device id. `None` means "assign a random id in \[8,119\] at start".
    #[serde(default)]
    pub device_id: Option<u8>,

    /// Default deadline for `get`/`put` calls, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Per-transport ack retry timeout, in seconds.
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,

    /// Lower bound of the randomised discovery broadcast interval, in seconds.
    #[serde(default = "default_discovery_min_secs")]
    pub discovery_interval_min_secs: u64,

    /// Upper bound of the randomised discovery broadcast interval, in seconds.
    #[serde(default = "default_discovery_max_secs")]
    pub discovery_interval_max_secs: u64,

    /// Baud rate used when opening a UART transport.
    #[serde(default = "default_baud_rate")]
    pub uart_baud_rate: u32,

    /// Read timeout applied to UART transports, in seconds.
    #[serde(default = "default_uart_read_timeout_secs")]
    pub uart_read_timeout_secs: u64,

    /// Depth of each transport's outgoing send queue.
    #[serde(default = "default_send_queue_depth")]
    pub send_queue_depth: usize,
}

fn default_request_timeout_secs() -> u64 {
    2
}

fn default_ack_timeout_secs() -> u64 {
    15
}

fn default_discovery_min_secs() -> u64 {
    3
}

fn default_discovery_max_secs() -> u64 {
    8
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_uart_read_timeout_secs() -> u64 {
    15
}

fn default_send_queue_depth() -> usize {
    256
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            request_timeout_secs: default_request_timeout_secs(),
            ack_timeout_secs: default_ack_timeout_secs(),
            discovery_interval_min_secs: default_discovery_min_secs(),
            discovery_interval_max_secs: default_discovery_max_secs(),
            uart_baud_rate: default_baud_rate(),
            uart_read_timeout_secs: default_uart_read_timeout_secs(),
            send_queue_depth: default_send_queue_depth(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Self =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// Default deadline for `get`/`put` calls.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Per-transport ack retry timeout.
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    /// Validate configuration, rejecting values the core cannot act on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(id) = self.device_id {
            if !(8..=119).contains(&id) {
                return Err(ConfigError::InvalidValue(format!(
                    "device_id {id} is outside the assignable range [8,119]"
                )));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "request_timeout_secs cannot be 0".into(),
            ));
        }
        if self.ack_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "ack_timeout_secs cannot be 0".into(),
            ));
        }
        if self.discovery_interval_min_secs == 0
            || self.discovery_interval_min_secs > self.discovery_interval_max_secs
        {
            return Err(ConfigError::InvalidValue(
                "discovery interval bounds must satisfy 0 < min <= max".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Clone)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Serialize(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(s) => write!(f, "I/O error: {s}"),
            Self::Parse(s) => write!(f, "parse error: {s}"),
            Self::Serialize(s) => write!(f, "serialize error: {s}"),
            Self::InvalidValue(s) => write!(f, "invalid value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = NodeConfig::default();
        assert_eq!(config.uart_baud_rate, 9600);
        assert!(config.device_id.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_reserved_device_id() {
        let config = NodeConfig {
            device_id: Some(3),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_discovery_bounds() {
        let config = NodeConfig {
            discovery_interval_min_secs: 9,
            discovery_interval_max_secs: 8,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let config = NodeConfig {
            device_id: Some(42),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: NodeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.device_id, Some(42));
    }
}
