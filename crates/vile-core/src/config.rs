//! Session configuration, loadable from TOML.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::attach::DeviceCandidate;
use crate::protocol::constants::{
    DEFAULT_CONFIGURE_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_TRANSFER_TIMEOUT_MS,
    LEGO_VENDOR_ID, NXT_ENDPOINT_IN, NXT_ENDPOINT_OUT, NXT_INTERFACE, NXT_PRODUCT_ID,
};

/// Which device to bind and where its pipes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceFilter {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: u8,
    pub endpoint_in: u8,
    pub endpoint_out: u8,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            vendor_id: LEGO_VENDOR_ID,
            product_id: NXT_PRODUCT_ID,
            interface: NXT_INTERFACE,
            endpoint_in: NXT_ENDPOINT_IN,
            endpoint_out: NXT_ENDPOINT_OUT,
        }
    }
}

impl DeviceFilter {
    /// Exact vendor and product match.
    pub fn matches(&self, candidate: &DeviceCandidate) -> bool {
        candidate.vendor_id == self.vendor_id && candidate.product_id == self.product_id
    }
}

/// Configuration for an NXT session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Per-transfer timeout in milliseconds.
    pub transfer_timeout_ms: u64,
    /// How long to wait for set-configuration to complete.
    pub configure_timeout_ms: u64,
    /// Hotplug polling interval.
    pub poll_interval_ms: u64,
    pub device: DeviceFilter,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transfer_timeout_ms: DEFAULT_TRANSFER_TIMEOUT_MS,
            configure_timeout_ms: DEFAULT_CONFIGURE_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            device: DeviceFilter::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn configure_timeout(&self) -> Duration {
        Duration::from_millis(self.configure_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
