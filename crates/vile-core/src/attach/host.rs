//! Host USB stack abstraction used by the attachment state machine.
//!
//! The host supplies device identities, descriptors and pipes; the state
//! machine decides which device to bind and when.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::transport::{TransportError, UsbTransport};

#[derive(Error, Debug)]
pub enum AttachError {
    #[error("Device {vid:04X}:{pid:04X} is not an NXT brick")]
    Rejected { vid: u16, pid: u16 },

    #[error("Driver is not started")]
    NotStarted,

    #[error("Already bound to {0}")]
    AlreadyBound(DeviceCandidate),

    #[error("Failed to enumerate devices: {0}")]
    ScanFailed(String),

    #[error("Device {0} is no longer present")]
    DeviceGone(DeviceCandidate),

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to read configuration descriptor: {0}")]
    Descriptor(String),

    #[error("Expected exactly one interface, device has {0}")]
    InterfaceCount(usize),

    #[error("Endpoint 0x{0:02X} not present")]
    MissingEndpoint(u8),

    #[error("Set configuration failed: {0}")]
    ConfigureFailed(String),

    #[error("Set configuration not acknowledged after {timeout_ms}ms")]
    ConfigureTimeout { timeout_ms: u64 },

    #[error("Failed to open pipes: {0}")]
    Pipe(#[from] TransportError),

    #[error("Device was detached while binding")]
    Interrupted,
}

/// A device seen on the bus, before it is opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceCandidate {
    pub bus_id: String,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceCandidate {
    /// Same physical attachment point, ignoring ids.
    pub fn same_device(&self, other: &DeviceCandidate) -> bool {
        self.bus_id == other.bus_id && self.address == other.address
    }
}

impl fmt::Display for DeviceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04X}:{:04X} at bus {} address {}",
            self.vendor_id, self.product_id, self.bus_id, self.address
        )
    }
}

/// The parts of a configuration descriptor that binding looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationSummary {
    /// `bConfigurationValue` to pass to set-configuration.
    pub value: u8,
    pub num_interfaces: usize,
    /// Addresses of every endpoint across all interfaces.
    pub endpoints: Vec<u8>,
}

/// Hotplug notification fed to `Attachment::handle_event`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Arrived(DeviceCandidate),
    Left(DeviceCandidate),
}

/// Host USB subsystem.
pub trait UsbHost: Send + Sync {
    type Device: UsbDevice;

    /// Switch the bus controller in or out of host mode. Hosts that are
    /// always in host mode return `Ok(())`.
    fn set_host_mode(&self, enabled: bool) -> Result<(), AttachError>;

    /// Enumerate attached devices.
    fn scan(&self) -> Result<Vec<DeviceCandidate>, AttachError>;

    /// Open a device for descriptor access and configuration.
    fn open(&self, candidate: &DeviceCandidate) -> Result<Self::Device, AttachError>;
}

/// An opened, not yet bound device.
pub trait UsbDevice {
    type Transport: UsbTransport + 'static;

    fn configuration(&self) -> Result<ConfigurationSummary, AttachError>;

    /// Issue set-configuration and block until the host confirms it, or
    /// until `timeout` expires.
    fn set_configuration(&self, value: u8, timeout: Duration) -> Result<(), AttachError>;

    /// Claim `interface` and open the IN and OUT bulk pipes.
    fn open_pipes(
        self,
        interface: u8,
        endpoint_in: u8,
        endpoint_out: u8,
    ) -> Result<Self::Transport, AttachError>;
}
