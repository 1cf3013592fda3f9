// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node configuration.
//!
//! Supports both programmatic and file-based (TOML) configuration. Every
//! field has a default matching the reference firmware, so an empty file or
//! a file with only `node_id` is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::NodeId;

/// Maximum payload carried by a single service request or reply.
pub const MAX_BM_SERVICE_DATA_SIZE: usize = 1024;

/// Largest DFU chunk a client will accept.
pub const BM_DFU_MAX_CHUNK_SIZE: u16 = 1024;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Node
// ============================================================================

/// Top-level node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// 64-bit node id. Zero is reserved (it means "all nodes" on the wire).
    #[serde(default)]
    pub node_id: NodeId,

    #[serde(default)]
    pub l2: L2Settings,

    #[serde(default)]
    pub bus: BusSettings,

    #[serde(default)]
    pub service: ServiceSettings,

    #[serde(default)]
    pub dfu: DfuSettings,
}

impl NodeConfig {
    /// Default configuration for the given node id.
    pub fn with_node_id(node_id: NodeId) -> Self {
        Self {
            node_id,
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id == 0 {
            return Err(ConfigError::Invalid("node_id must be non-zero".into()));
        }

        if self.l2.event_queue_len == 0 {
            return Err(ConfigError::Invalid("l2.event_queue_len must be > 0".into()));
        }
        if self.l2.enqueue_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "l2.enqueue_timeout_ms must be > 0".into(),
            ));
        }

        if self.bus.queue_len == 0 {
            return Err(ConfigError::Invalid("bus.queue_len must be > 0".into()));
        }

        let svc = &self.service;
        if svc.lock_timeout_ms == 0 || svc.expiry_period_ms == 0 {
            return Err(ConfigError::Invalid(
                "service timeouts must be > 0".into(),
            ));
        }
        if svc.timer_queue_len == 0 {
            return Err(ConfigError::Invalid(
                "service.timer_queue_len must be > 0".into(),
            ));
        }
        if svc.max_data_size == 0 || svc.max_data_size > MAX_BM_SERVICE_DATA_SIZE {
            return Err(ConfigError::Invalid(format!(
                "service.max_data_size must be in 1..={} (got {})",
                MAX_BM_SERVICE_DATA_SIZE, svc.max_data_size
            )));
        }

        let dfu = &self.dfu;
        if dfu.event_queue_len == 0 {
            return Err(ConfigError::Invalid("dfu.event_queue_len must be > 0".into()));
        }
        for (name, value) in [
            ("ack_timeout_ms", dfu.ack_timeout_ms),
            ("heartbeat_timeout_ms", dfu.heartbeat_timeout_ms),
            ("chunk_timeout_ms", dfu.chunk_timeout_ms),
            ("update_timeout_ms", dfu.update_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("dfu.{} must be > 0", name)));
            }
        }
        if dfu.max_chunk_size == 0 || dfu.max_chunk_size > BM_DFU_MAX_CHUNK_SIZE {
            return Err(ConfigError::Invalid(format!(
                "dfu.max_chunk_size must be in 1..={} (got {})",
                BM_DFU_MAX_CHUNK_SIZE, dfu.max_chunk_size
            )));
        }

        Ok(())
    }
}

// ============================================================================
// L2
// ============================================================================

/// L2 forwarding engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L2Settings {
    /// Depth of the L2 event queue.
    #[serde(default = "default_l2_queue_len")]
    pub event_queue_len: usize,

    /// Bounded wait for TX/link enqueue before giving up.
    #[serde(default = "default_l2_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
}

fn default_l2_queue_len() -> usize {
    32
}

fn default_l2_enqueue_timeout_ms() -> u64 {
    10
}

impl Default for L2Settings {
    fn default() -> Self {
        Self {
            event_queue_len: default_l2_queue_len(),
            enqueue_timeout_ms: default_l2_enqueue_timeout_ms(),
        }
    }
}

impl L2Settings {
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }
}

// ============================================================================
// Pub/Sub
// ============================================================================

/// Pub/sub middleware settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSettings {
    /// Depth of the middleware delivery queue (local publishes + network RX).
    #[serde(default = "default_bus_queue_len")]
    pub queue_len: usize,
}

fn default_bus_queue_len() -> usize {
    32
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            queue_len: default_bus_queue_len(),
        }
    }
}

// ============================================================================
// Services
// ============================================================================

/// Service request/reply settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Bounded wait when acquiring the pending-request or handler lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Period of the pending-request expiry sweep.
    #[serde(default = "default_expiry_period_ms")]
    pub expiry_period_ms: u64,

    /// Maximum request/reply data size.
    #[serde(default = "default_max_data_size")]
    pub max_data_size: usize,

    /// Depth of the timer callback handler queue.
    #[serde(default = "default_timer_queue_len")]
    pub timer_queue_len: usize,
}

fn default_lock_timeout_ms() -> u64 {
    100
}

fn default_expiry_period_ms() -> u64 {
    500
}

fn default_max_data_size() -> usize {
    MAX_BM_SERVICE_DATA_SIZE
}

fn default_timer_queue_len() -> usize {
    10
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            expiry_period_ms: default_expiry_period_ms(),
            max_data_size: default_max_data_size(),
            timer_queue_len: default_timer_queue_len(),
        }
    }
}

impl ServiceSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn expiry_period(&self) -> Duration {
        Duration::from_millis(self.expiry_period_ms)
    }
}

// ============================================================================
// DFU
// ============================================================================

/// Firmware update state machine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DfuSettings {
    #[serde(default = "default_dfu_queue_len")]
    pub event_queue_len: usize,

    /// Host: wait for the client's ACK to START.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Host: maximum silence between chunk requests.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// Client: wait for a chunk (also used for reboot/boot-complete retries).
    #[serde(default = "default_chunk_timeout_ms")]
    pub chunk_timeout_ms: u64,

    /// Host: whole-update watchdog when the caller passes no timeout.
    #[serde(default = "default_update_timeout_ms")]
    pub update_timeout_ms: u64,

    #[serde(default = "default_max_ack_retries")]
    pub max_ack_retries: u8,

    #[serde(default = "default_max_chunk_retries")]
    pub max_chunk_retries: u8,

    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u16,

    /// Host: byte offset of the image inside its flash partition.
    #[serde(default)]
    pub image_offset: u32,
}

fn default_dfu_queue_len() -> usize {
    32
}

fn default_ack_timeout_ms() -> u64 {
    10_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_chunk_timeout_ms() -> u64 {
    2_000
}

fn default_update_timeout_ms() -> u64 {
    5 * 60 * 1000
}

fn default_max_ack_retries() -> u8 {
    2
}

fn default_max_chunk_retries() -> u8 {
    5
}

fn default_max_chunk_size() -> u16 {
    BM_DFU_MAX_CHUNK_SIZE
}

impl Default for DfuSettings {
    fn default() -> Self {
        Self {
            event_queue_len: default_dfu_queue_len(),
            ack_timeout_ms: default_ack_timeout_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            chunk_timeout_ms: default_chunk_timeout_ms(),
            update_timeout_ms: default_update_timeout_ms(),
            max_ack_retries: default_max_ack_retries(),
            max_chunk_retries: default_max_chunk_retries(),
            max_chunk_size: default_max_chunk_size(),
            image_offset: 0,
        }
    }
}

impl DfuSettings {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn update_timeout(&self) -> Duration {
        Duration::from_millis(self.update_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_firmware() {
        let config = NodeConfig::with_node_id(1);
        assert_eq!(config.l2.event_queue_len, 32);
        assert_eq!(config.service.lock_timeout_ms, 100);
        assert_eq!(config.service.expiry_period_ms, 500);
        assert_eq!(config.service.max_data_size, 1024);
        assert_eq!(config.dfu.max_chunk_retries, 5);
        assert_eq!(config.dfu.max_ack_retries, 2);
        assert_eq!(config.dfu.update_timeout(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_node_id_rejected() {
        let config = NodeConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = NodeConfig::from_toml(
            r#"
            node_id = 0x1234

            [dfu]
            chunk_timeout_ms = 250
            max_chunk_size = 512
            "#,
        )
        .expect("valid config");

        assert_eq!(config.node_id, 0x1234);
        assert_eq!(config.dfu.chunk_timeout_ms, 250);
        assert_eq!(config.dfu.max_chunk_size, 512);
        assert_eq!(config.dfu.ack_timeout_ms, 10_000);
        assert_eq!(config.l2.enqueue_timeout(), Duration::from_millis(10));
    }

    #[test]
    fn test_oversized_limits_rejected() {
        let err = NodeConfig::from_toml(
            r#"
            node_id = 7
            [service]
            max_data_size = 4096
            "#,
        );
        assert!(matches!(err, Err(ConfigError::Invalid(_))));

        let err = NodeConfig::from_toml(
            r#"
            node_id = 7
            [dfu]
            max_chunk_size = 2048
            "#,
        );
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "node_id = 42\n[l2]\nevent_queue_len = 8").expect("write");

        let config = NodeConfig::from_file(file.path()).expect("load");
        assert_eq!(config.node_id, 42);
        assert_eq!(config.l2.event_queue_len, 8);
    }

    #[test]
    fn test_bad_toml_reports_parse_error() {
        let err = NodeConfig::from_toml("node_id = [");
        assert!(matches!(err, Err(ConfigError::Toml(_))));
    }
}
