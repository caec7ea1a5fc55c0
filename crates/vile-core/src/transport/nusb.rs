//! nusb-based USB host, device and transport implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, mpsc};
use std::thread;
use std::time::Duration;

use nusb::transfer::{Buffer, Bulk, In, Out, TransferError};
use nusb::{Endpoint, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, warn};

use super::traits::{TransportError, UsbTransport};
use crate::attach::{AttachError, ConfigurationSummary, DeviceCandidate, UsbDevice, UsbHost};

/// nusb 0.2 requires IN transfer lengths to be a multiple of max_packet_size.
fn round_up_to_max_packet(len: usize, max_packet_size: usize) -> usize {
    len.div_ceil(max_packet_size.max(1)) * max_packet_size.max(1)
}

/// Run `f` on a detached thread and wait up to `timeout` for its result.
///
/// Returns `None` on timeout. The thread is not joined: it runs `f` to
/// completion and its result is dropped.
fn run_with_timeout<T, F>(timeout: Duration, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(timeout).ok()
}

/// Bulk IN/OUT pipes on a claimed interface.
pub struct NusbTransport {
    out_ep: Mutex<Endpoint<Bulk, Out>>,
    in_ep: Mutex<Endpoint<Bulk, In>>,
    timeout: Duration,
    alive: AtomicBool,
}

impl NusbTransport {
    fn map_status(&self, status: TransferError) -> TransportError {
        match status {
            TransferError::Cancelled => TransportError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            },
            TransferError::Disconnected => {
                self.alive.store(false, Ordering::Release);
                TransportError::Disconnected
            }
            other => TransportError::ReadFailed(other.to_string()),
        }
    }
}

impl UsbTransport for NusbTransport {
    #[instrument(level = "trace", skip(self, data), fields(len = data.len()))]
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let mut ep = self.out_ep.lock().unwrap_or_else(PoisonError::into_inner);
        let completion = ep.transfer_blocking(Buffer::from(data.to_vec()), self.timeout);
        if let Err(status) = completion.status {
            return Err(match self.map_status(status) {
                TransportError::ReadFailed(msg) => TransportError::WriteFailed(msg),
                other => other,
            });
        }
        debug!(bytes_written = completion.actual_len, "Write complete");
        Ok(completion.actual_len)
    }

    #[instrument(level = "trace", skip(self))]
    fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let mut ep = self.in_ep.lock().unwrap_or_else(PoisonError::into_inner);
        let requested_len = round_up_to_max_packet(max_len, ep.max_packet_size());
        let mut buf = Buffer::new(requested_len);
        buf.set_requested_len(requested_len);
        let completion = ep.transfer_blocking(buf, self.timeout);
        if let Err(status) = completion.status {
            return Err(self.map_status(status));
        }
        let actual = completion.actual_len.min(max_len);
        debug!(bytes_read = actual, "Read complete");
        Ok(completion.buffer[..actual].to_vec())
    }

    fn is_connected(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

/// The host's USB stack as exposed by nusb.
#[derive(Debug, Clone)]
pub struct NusbHost {
    transfer_timeout: Duration,
}

impl NusbHost {
    pub fn new(transfer_timeout: Duration) -> Self {
        Self { transfer_timeout }
    }
}

impl UsbHost for NusbHost {
    type Device = NusbDevice;

    fn set_host_mode(&self, enabled: bool) -> Result<(), AttachError> {
        // Desktop controllers are permanently in host mode.
        debug!(enabled, "Host mode switch not needed");
        Ok(())
    }

    fn scan(&self) -> Result<Vec<DeviceCandidate>, AttachError> {
        let devices = list_devices()
            .wait()
            .map_err(|e| AttachError::ScanFailed(e.to_string()))?;
        Ok(devices
            .map(|d| DeviceCandidate {
                bus_id: d.bus_id().to_string(),
                address: d.device_address(),
                vendor_id: d.vendor_id(),
                product_id: d.product_id(),
            })
            .collect())
    }

    #[instrument(level = "info", skip(self), fields(device = %candidate))]
    fn open(&self, candidate: &DeviceCandidate) -> Result<NusbDevice, AttachError> {
        let info = list_devices()
            .wait()
            .map_err(|e| AttachError::ScanFailed(e.to_string()))?
            .find(|d| d.bus_id() == candidate.bus_id && d.device_address() == candidate.address)
            .ok_or_else(|| AttachError::DeviceGone(candidate.clone()))?;

        let device = info
            .open()
            .wait()
            .map_err(|e| AttachError::OpenFailed(e.to_string()))?;

        info!("Device opened");
        Ok(NusbDevice {
            device,
            transfer_timeout: self.transfer_timeout,
        })
    }
}

/// An opened nusb device that has not had its pipes claimed yet.
pub struct NusbDevice {
    device: nusb::Device,
    transfer_timeout: Duration,
}

impl UsbDevice for NusbDevice {
    type Transport = NusbTransport;

    fn configuration(&self) -> Result<ConfigurationSummary, AttachError> {
        let config = self
            .device
            .configurations()
            .next()
            .ok_or_else(|| AttachError::Descriptor("no configuration descriptor".into()))?;

        let mut endpoints = Vec::new();
        let mut num_interfaces = 0;
        for iface in config.interfaces() {
            num_interfaces += 1;
            for alt in iface.alt_settings() {
                endpoints.extend(alt.endpoints().map(|ep| ep.address()));
            }
        }

        Ok(ConfigurationSummary {
            value: config.configuration_value(),
            num_interfaces,
            endpoints,
        })
    }

    /// nusb offers no way to cancel a control request once submitted, so the
    /// request runs on its own thread. After a timeout that thread stays
    /// blocked until the host completes or fails the request; each timed-out
    /// bind to a hung brick leaves one such thread behind until then.
    fn set_configuration(&self, value: u8, timeout: Duration) -> Result<(), AttachError> {
        let device = self.device.clone();
        match run_with_timeout(timeout, move || device.set_configuration(value).wait()) {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(AttachError::ConfigureFailed(e.to_string())),
            None => {
                warn!(value, "Set configuration timed out, request left outstanding");
                Err(AttachError::ConfigureTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    #[instrument(level = "info", skip(self), fields(
        ep_in = %format!("0x{:02X}", endpoint_in),
        ep_out = %format!("0x{:02X}", endpoint_out),
    ))]
    fn open_pipes(
        self,
        interface: u8,
        endpoint_in: u8,
        endpoint_out: u8,
    ) -> Result<NusbTransport, AttachError> {
        let iface = self.device.claim_interface(interface).wait().map_err(|e| {
            TransportError::ClaimInterfaceFailed {
                interface,
                message: e.to_string(),
            }
        })?;

        let out_ep = iface.endpoint::<Bulk, Out>(endpoint_out).map_err(|e| {
            TransportError::EndpointOpenFailed {
                address: endpoint_out,
                message: e.to_string(),
            }
        })?;
        let in_ep = iface.endpoint::<Bulk, In>(endpoint_in).map_err(|e| {
            TransportError::EndpointOpenFailed {
                address: endpoint_in,
                message: e.to_string(),
            }
        })?;

        info!("Pipes opened");
        Ok(NusbTransport {
            out_ep: Mutex::new(out_ep),
            in_ep: Mutex::new(in_ep),
            timeout: self.transfer_timeout,
            alive: AtomicBool::new(true),
        })
    }
}
