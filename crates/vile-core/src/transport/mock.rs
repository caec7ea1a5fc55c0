//! Mock USB host, device and transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::traits::{TransportError, UsbTransport};
use crate::attach::{AttachError, ConfigurationSummary, DeviceCandidate, UsbDevice, UsbHost};
use crate::protocol::{LEGO_VENDOR_ID, NXT_PRODUCT_ID, Status};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

type WriteHook = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Mock transport for unit testing the session and attachment logic.
///
/// Clones share state, so a test can keep a handle after the attachment
/// takes ownership of another.
#[derive(Clone)]
pub struct MockTransport {
    /// Queued replies to return on read.
    reply_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Bytes the next write reports as accepted, if short.
    short_write: Arc<Mutex<Option<usize>>>,
    on_write: Arc<Mutex<Option<WriteHook>>>,
    connected: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            reply_queue: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            short_write: Arc::new(Mutex::new(None)),
            on_write: Arc::new(Mutex::new(None)),
            connected: Arc::new(Mutex::new(true)),
        }
    }

    /// Queue raw bytes to be returned on the next read.
    pub fn queue_reply(&self, bytes: &[u8]) {
        lock(&self.reply_queue).push_back(bytes.to_vec());
    }

    /// Queue a bare 3-byte status reply for `opcode`.
    pub fn queue_status(&self, opcode: u8, status: Status) {
        self.queue_reply(&[0x02, opcode, status.code()]);
    }

    /// Get all captured writes.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.write_log).clone()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        lock(&self.write_log).clear();
    }

    /// Make the next write report only `accepted` bytes.
    pub fn short_next_write(&self, accepted: usize) {
        *lock(&self.short_write) = Some(accepted);
    }

    /// Run `hook` after each captured write, before the write returns.
    pub fn on_write(&self, hook: impl Fn(&[u8]) + Send + Sync + 'static) {
        *lock(&self.on_write) = Some(Box::new(hook));
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *lock(&self.connected) = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        *lock(&self.connected) = true;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport for MockTransport {
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        lock(&self.write_log).push(data.to_vec());
        if let Some(hook) = lock(&self.on_write).as_ref() {
            hook(data);
        }
        Ok(lock(&self.short_write).take().unwrap_or(data.len()))
    }

    fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let mut reply = lock(&self.reply_queue)
            .pop_front()
            .ok_or(TransportError::Timeout { timeout_ms: 1000 })?;
        reply.truncate(max_len);
        Ok(reply)
    }

    fn is_connected(&self) -> bool {
        *lock(&self.connected)
    }
}

/// A device the mock host reports as plugged in.
#[derive(Clone)]
pub struct PluggedDevice {
    pub candidate: DeviceCandidate,
    pub configuration: ConfigurationSummary,
    pub transport: MockTransport,
}

impl PluggedDevice {
    /// A well-formed NXT brick at `bus_id`/`address`.
    pub fn nxt(bus_id: &str, address: u8) -> Self {
        Self {
            candidate: DeviceCandidate {
                bus_id: bus_id.to_string(),
                address,
                vendor_id: LEGO_VENDOR_ID,
                product_id: NXT_PRODUCT_ID,
            },
            configuration: ConfigurationSummary {
                value: 1,
                num_interfaces: 1,
                endpoints: vec![0x01, 0x82],
            },
            transport: MockTransport::new(),
        }
    }
}

#[derive(Default)]
struct HostState {
    devices: Vec<PluggedDevice>,
    host_mode_calls: Vec<bool>,
    configure_stalls: bool,
    opens: usize,
}

/// Mock host USB stack.
#[derive(Clone, Default)]
pub struct MockHost {
    state: Arc<Mutex<HostState>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plug(&self, brick: PluggedDevice) {
        lock(&self.state).devices.push(brick);
    }

    pub fn unplug(&self, candidate: &DeviceCandidate) {
        lock(&self.state)
            .devices
            .retain(|d| !d.candidate.same_device(candidate));
    }

    /// Host mode switches requested so far, in order.
    pub fn host_mode_calls(&self) -> Vec<bool> {
        lock(&self.state).host_mode_calls.clone()
    }

    /// Make set-configuration never complete.
    pub fn stall_configure(&self, stall: bool) {
        lock(&self.state).configure_stalls = stall;
    }

    /// Number of successful `open` calls.
    pub fn open_count(&self) -> usize {
        lock(&self.state).opens
    }
}

impl UsbHost for MockHost {
    type Device = MockDevice;

    fn set_host_mode(&self, enabled: bool) -> Result<(), AttachError> {
        lock(&self.state).host_mode_calls.push(enabled);
        Ok(())
    }

    fn scan(&self) -> Result<Vec<DeviceCandidate>, AttachError> {
        Ok(lock(&self.state)
            .devices
            .iter()
            .map(|d| d.candidate.clone())
            .collect())
    }

    fn open(&self, candidate: &DeviceCandidate) -> Result<MockDevice, AttachError> {
        let mut state = lock(&self.state);
        let brick = state
            .devices
            .iter()
            .find(|d| d.candidate.same_device(candidate))
            .cloned()
            .ok_or_else(|| AttachError::DeviceGone(candidate.clone()))?;
        state.opens += 1;
        Ok(MockDevice {
            brick,
            configure_stalls: state.configure_stalls,
        })
    }
}

/// An opened mock device.
pub struct MockDevice {
    brick: PluggedDevice,
    configure_stalls: bool,
}

impl UsbDevice for MockDevice {
    type Transport = MockTransport;

    fn configuration(&self) -> Result<ConfigurationSummary, AttachError> {
        Ok(self.brick.configuration.clone())
    }

    fn set_configuration(&self, _value: u8, timeout: Duration) -> Result<(), AttachError> {
        if self.configure_stalls {
            return Err(AttachError::ConfigureTimeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(())
    }

    fn open_pipes(
        self,
        _interface: u8,
        endpoint_in: u8,
        endpoint_out: u8,
    ) -> Result<MockTransport, AttachError> {
        for ep in [endpoint_in, endpoint_out] {
            if !self.brick.configuration.endpoints.contains(&ep) {
                return Err(TransportError::EndpointOpenFailed {
                    address: ep,
                    message: "not present".into(),
                }
                .into());
            }
        }
        Ok(self.brick.transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_reply_queue() {
        let mock = MockTransport::new();
        mock.queue_status(0x01, Status::Ok);
        mock.queue_reply(&[0x02, 0x0B, 0x00, 0x2C, 0x1D]);

        assert_eq!(mock.read(64).unwrap(), vec![0x02, 0x01, 0x00]);
        assert_eq!(mock.read(64).unwrap(), vec![0x02, 0x0B, 0x00, 0x2C, 0x1D]);

        // Queue is empty now
        assert!(matches!(
            mock.read(64),
            Err(TransportError::Timeout { .. })
        ));
    }

    #[test]
    fn test_mock_write_capture() {
        let mock = MockTransport::new();
        mock.write(&[0x00, 0x0B]).unwrap();
        mock.write(&[0x00, 0x0D]).unwrap();

        let writes = mock.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1], vec![0x00, 0x0D]);

        mock.clear_writes();
        assert!(mock.writes().is_empty());
    }

    #[test]
    fn test_mock_short_write() {
        let mock = MockTransport::new();
        mock.short_next_write(1);
        assert_eq!(mock.write(&[0x00, 0x0B]).unwrap(), 1);
        assert_eq!(mock.write(&[0x00, 0x0B]).unwrap(), 2);
    }

    #[test]
    fn test_mock_disconnect() {
        let mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.disconnect();
        assert!(!mock.is_connected());
        assert!(matches!(
            mock.write(&[0x00]),
            Err(TransportError::Disconnected)
        ));

        mock.reconnect();
        assert!(mock.is_connected());
    }

    #[test]
    fn test_mock_host_plug_unplug() {
        let host = MockHost::new();
        let brick = PluggedDevice::nxt("1", 7);
        host.plug(brick.clone());
        assert_eq!(host.scan().unwrap(), vec![brick.candidate.clone()]);

        host.unplug(&brick.candidate);
        assert!(host.scan().unwrap().is_empty());
        assert!(matches!(
            host.open(&brick.candidate),
            Err(AttachError::DeviceGone(_))
        ));
    }
}
