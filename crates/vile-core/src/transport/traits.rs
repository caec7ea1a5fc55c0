//! USB Transport layer abstraction.
//!
//! Defines the `UsbTransport` trait over the brick's two bulk pipes,
//! allowing different implementations (nusb, mock, etc.).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Failed to open endpoint 0x{address:02X}: {message}")]
    EndpointOpenFailed { address: u8, message: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// The bound brick's OUT and IN bulk pipes.
///
/// Each call submits exactly one transfer and blocks until it completes or
/// the implementation's timeout expires. Calls are not expected to overlap;
/// the session serialises them.
pub trait UsbTransport: Send + Sync {
    /// Send `data` on the OUT pipe. Returns the number of bytes the device
    /// accepted, which may be short.
    fn write(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// Receive up to `max_len` bytes from the IN pipe.
    fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Check if device is still connected.
    fn is_connected(&self) -> bool;
}
