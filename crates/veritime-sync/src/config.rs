//! # Engine Configuration
//!
//! Configuration for the ingestion engine.
//!
//! ## Configuration File Format
//! ```toml
//! # veritime.toml
//! institution_id = 1
//!
//! [poll]
//! interval_secs = 60
//! connect_timeout_secs = 10
//! initial_backoff_ms = 500
//! max_backoff_secs = 60
//! max_failures = 5
//!
//! [receiver]
//! bind_addr = "0.0.0.0"
//! port = 8081
//!
//! [[devices]]
//! serial = "CKJG194360307"
//! name = "Main Gate"
//! host = "192.168.1.201"   # poll-mode devices only
//! port = 4370
//! mode = "poll"            # poll | push
//!
//! [[devices]]
//! serial = "ZKDEV123456"
//! name = "Staff Room uFace"
//! mode = "push"
//! ```
//!
//! Devices listed here are reconciled into the registry at startup;
//! devices registered through the admin surface survive regardless.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::device_link::VendorLinkConfig;
use crate::error::{SyncError, SyncResult};
use crate::poller::PollerConfig;
use crate::receiver::ReceiverConfig;
use veritime_core::validation::validate_serial;
use veritime_core::{ConnectionMode, DEFAULT_INSTITUTION_ID, VENDOR_DEFAULT_PORT};

// =============================================================================
// Device Entries
// =============================================================================

/// One terminal declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Hardware serial number.
    pub serial: String,

    /// Human-readable name.
    pub name: String,

    /// Network host for poll-mode devices.
    pub host: Option<String>,

    /// Vendor protocol port.
    #[serde(default = "default_device_port")]
    pub port: u16,

    /// poll | push
    #[serde(default)]
    pub mode: ConnectionMode,
}

fn default_device_port() -> u16 {
    VENDOR_DEFAULT_PORT
}

// =============================================================================
// Section Settings
// =============================================================================

/// `[poll]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub interval_secs: u64,
    pub connect_timeout_secs: u64,
    pub io_timeout_secs: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_secs: u64,
    pub max_failures: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        PollSettings {
            interval_secs: 60,
            connect_timeout_secs: 10,
            io_timeout_secs: 10,
            initial_backoff_ms: 500,
            max_backoff_secs: 60,
            max_failures: 5,
        }
    }
}

/// `[receiver]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverSettings {
    pub bind_addr: String,
    pub port: u16,
}

impl Default for ReceiverSettings {
    fn default() -> Self {
        ReceiverSettings {
            bind_addr: "0.0.0.0".to_string(),
            port: 8081,
        }
    }
}

// =============================================================================
// SyncConfig
// =============================================================================

/// Full engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Institution scope for staff resolution.
    #[serde(default = "default_institution_id")]
    pub institution_id: i64,

    /// Terminals declared in the config file.
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,

    #[serde(default)]
    pub poll: PollSettings,

    #[serde(default)]
    pub receiver: ReceiverSettings,
}

fn default_institution_id() -> i64 {
    DEFAULT_INSTITUTION_ID
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            institution_id: DEFAULT_INSTITUTION_ID,
            devices: Vec::new(),
            poll: PollSettings::default(),
            receiver: ReceiverSettings::default(),
        }
    }
}

impl SyncConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::ConfigLoad(format!("{}: {}", path.display(), e)))?;

        let config: SyncConfig = toml::from_str(&raw)?;
        config.validate()?;

        info!(
            path = %path.display(),
            devices = config.devices.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.institution_id <= 0 {
            return Err(SyncError::InvalidConfig(
                "institution_id must be positive".to_string(),
            ));
        }

        for device in &self.devices {
            validate_serial(&device.serial)
                .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;

            if device.mode == ConnectionMode::Poll && device.host.is_none() {
                return Err(SyncError::InvalidConfig(format!(
                    "poll-mode device {} needs a host",
                    device.serial
                )));
            }
        }

        if self.poll.interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "poll.interval_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Poller tuning derived from the `[poll]` section.
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_secs(self.poll.interval_secs),
            initial_backoff: Duration::from_millis(self.poll.initial_backoff_ms),
            max_backoff: Duration::from_secs(self.poll.max_backoff_secs),
            max_failures: self.poll.max_failures,
        }
    }

    /// DeviceLink timeouts derived from the `[poll]` section.
    pub fn vendor_link_config(&self) -> VendorLinkConfig {
        VendorLinkConfig {
            connect_timeout: Duration::from_secs(self.poll.connect_timeout_secs),
            io_timeout: Duration::from_secs(self.poll.io_timeout_secs),
        }
    }

    /// Receiver bind settings derived from the `[receiver]` section.
    pub fn receiver_config(&self) -> ReceiverConfig {
        ReceiverConfig {
            bind_addr: self.receiver.bind_addr.clone(),
            port: self.receiver.port,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let raw = r#"
            institution_id = 3

            [poll]
            interval_secs = 30
            max_failures = 3

            [receiver]
            port = 9090

            [[devices]]
            serial = "CKJG194360307"
            name = "Main Gate"
            host = "192.168.1.201"
            mode = "poll"

            [[devices]]
            serial = "ZKDEV123456"
            name = "Staff Room"
            mode = "push"
        "#;

        let config: SyncConfig = toml::from_str(raw).unwrap();
        config.validate().unwrap();

        assert_eq!(config.institution_id, 3);
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].port, VENDOR_DEFAULT_PORT);
        assert_eq!(config.devices[0].mode, ConnectionMode::Poll);
        assert_eq!(config.devices[1].mode, ConnectionMode::Push);
        assert_eq!(config.poll.interval_secs, 30);
        // Unspecified fields keep their defaults
        assert_eq!(config.poll.initial_backoff_ms, 500);
        assert_eq!(config.receiver.port, 9090);
    }

    #[test]
    fn poll_device_without_host_is_rejected() {
        let raw = r#"
            [[devices]]
            serial = "ZK-01"
            name = "Gate"
            mode = "poll"
        "#;

        let config: SyncConfig = toml::from_str(raw).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn bad_serial_is_rejected() {
        let raw = r#"
            [[devices]]
            serial = "not a serial!"
            name = "Gate"
            mode = "push"
        "#;

        let config: SyncConfig = toml::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn defaults_are_sane() {
        let config = SyncConfig::default();
        config.validate().unwrap();

        let poller = config.poller_config();
        assert_eq!(poller.poll_interval, Duration::from_secs(60));
        assert_eq!(poller.max_failures, 5);
    }
}
