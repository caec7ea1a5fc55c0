//! Attachment state machine: binds at most one brick and tracks its lifetime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::host::{AttachError, DeviceCandidate, HotplugEvent, UsbDevice, UsbHost};
use crate::config::DeviceFilter;
use crate::events::{AttachState, NxtEvent, NxtObserver, TracingObserver};
use crate::transport::UsbTransport;

/// Transport type produced by a host's devices.
pub type TransportOf<H> = <<H as UsbHost>::Device as UsbDevice>::Transport;

/// A command's snapshot of the binding.
///
/// Holding the `Arc` keeps the pipes open even if the device is detached
/// mid-exchange; `Attachment::is_current` tells whether that happened.
pub struct Lease<T> {
    pub transport: Arc<T>,
    pub generation: u64,
}

struct Binding<T> {
    device: DeviceCandidate,
    transport: Arc<T>,
}

struct Inner<T> {
    state: AttachState,
    started: bool,
    binding: Option<Binding<T>>,
    /// Candidate currently between Probing and Ready.
    pending: Option<DeviceCandidate>,
    /// Bricks that failed to bind; skipped by `refresh` until they leave.
    failed: Vec<DeviceCandidate>,
}

/// Owns the device binding for one driver instance.
pub struct Attachment<H: UsbHost> {
    host: H,
    filter: DeviceFilter,
    configure_timeout: Duration,
    inner: Mutex<Inner<TransportOf<H>>>,
    /// Advances on every bind and every unbind.
    generation: AtomicU64,
    observer: Arc<dyn NxtObserver>,
}

impl<H: UsbHost> Attachment<H> {
    pub fn new(host: H, filter: DeviceFilter, configure_timeout: Duration) -> Self {
        Self::with_observer(host, filter, configure_timeout, Arc::new(TracingObserver))
    }

    pub fn with_observer(
        host: H,
        filter: DeviceFilter,
        configure_timeout: Duration,
        observer: Arc<dyn NxtObserver>,
    ) -> Self {
        Self {
            host,
            filter,
            configure_timeout,
            inner: Mutex::new(Inner {
                state: AttachState::Unbound,
                started: false,
                binding: None,
                pending: None,
                failed: Vec::new(),
            }),
            generation: AtomicU64::new(0),
            observer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<TransportOf<H>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, inner: &mut Inner<TransportOf<H>>, to: AttachState) {
        let from = inner.state;
        if from == to {
            return;
        }
        debug!(from = %from, to = %to, "Attach state transition");
        inner.state = to;
        self.observer.on_event(&NxtEvent::StateChanged { from, to });
    }

    /// Drop the binding, if any. Pipes close once the last lease is gone.
    fn unbind(&self, inner: &mut Inner<TransportOf<H>>) -> bool {
        inner.pending = None;
        let released = match inner.binding.take() {
            Some(binding) => {
                self.generation.fetch_add(1, Ordering::SeqCst);
                info!(device = %binding.device, "NXT unbound");
                self.observer.on_event(&NxtEvent::DeviceDetached);
                true
            }
            None => false,
        };
        self.transition(inner, AttachState::Unbound);
        released
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn filter(&self) -> &DeviceFilter {
        &self.filter
    }

    pub fn state(&self) -> AttachState {
        self.lock().state
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// The bound device, if any.
    pub fn bound_device(&self) -> Option<DeviceCandidate> {
        self.lock().binding.as_ref().map(|b| b.device.clone())
    }

    /// Assert host mode and accept devices.
    #[instrument(level = "info", skip(self))]
    pub fn start(&self) -> Result<(), AttachError> {
        self.host.set_host_mode(true)?;
        self.lock().started = true;
        info!("Driver started");
        Ok(())
    }

    /// Unbind, release host mode and stop accepting devices.
    #[instrument(level = "info", skip(self))]
    pub fn stop(&self) -> Result<(), AttachError> {
        {
            let mut inner = self.lock();
            inner.started = false;
            inner.failed.clear();
            self.unbind(&mut inner);
        }
        self.host.set_host_mode(false)?;
        info!("Driver stopped");
        Ok(())
    }

    /// Re-assert host mode after a system resume.
    pub fn resume(&self) -> Result<(), AttachError> {
        if self.lock().started {
            debug!("Re-asserting host mode after resume");
            self.host.set_host_mode(true)?;
        }
        Ok(())
    }

    /// Accept `candidate` iff its ids match the filter.
    pub fn probe(&self, candidate: &DeviceCandidate) -> Result<(), AttachError> {
        if self.filter.matches(candidate) {
            Ok(())
        } else {
            Err(AttachError::Rejected {
                vid: candidate.vendor_id,
                pid: candidate.product_id,
            })
        }
    }

    /// Probe and bind `candidate`.
    ///
    /// The lock is not held while the device is opened and configured, so a
    /// detach may arrive meanwhile; it is detected when committing.
    #[instrument(level = "info", skip(self), fields(device = %candidate))]
    pub fn attach(&self, candidate: &DeviceCandidate) -> Result<(), AttachError> {
        self.probe(candidate)?;
        {
            let mut inner = self.lock();
            if !inner.started {
                return Err(AttachError::NotStarted);
            }
            if let Some(binding) = &inner.binding {
                return Err(AttachError::AlreadyBound(binding.device.clone()));
            }
            if let Some(pending) = &inner.pending {
                return Err(AttachError::AlreadyBound(pending.clone()));
            }
            inner.pending = Some(candidate.clone());
            self.transition(&mut inner, AttachState::Probing);
            self.transition(&mut inner, AttachState::Binding);
        }

        let result = self.bind(candidate);

        let mut inner = self.lock();
        let still_pending = inner.started
            && inner.state == AttachState::Binding
            && inner
                .pending
                .as_ref()
                .is_some_and(|p| p.same_device(candidate));

        match result {
            Ok(transport) if still_pending => {
                inner.pending = None;
                inner.failed.retain(|f| !f.same_device(candidate));
                inner.binding = Some(Binding {
                    device: candidate.clone(),
                    transport: Arc::new(transport),
                });
                self.generation.fetch_add(1, Ordering::SeqCst);
                self.transition(&mut inner, AttachState::Ready);
                info!("NXT bound");
                self.observer.on_event(&NxtEvent::DeviceAttached {
                    vid: candidate.vendor_id,
                    pid: candidate.product_id,
                    bus_id: candidate.bus_id.clone(),
                    address: candidate.address,
                });
                Ok(())
            }
            Ok(_) => {
                warn!("Device went away while binding");
                Err(AttachError::Interrupted)
            }
            Err(e) => {
                if still_pending {
                    inner.pending = None;
                    inner.failed.push(candidate.clone());
                    self.transition(&mut inner, AttachState::Unbound);
                }
                warn!(error = %e, "Bind failed");
                Err(e)
            }
        }
    }

    fn bind(&self, candidate: &DeviceCandidate) -> Result<TransportOf<H>, AttachError> {
        let device = self.host.open(candidate)?;
        let config = device.configuration()?;

        if config.num_interfaces != 1 {
            return Err(AttachError::InterfaceCount(config.num_interfaces));
        }
        for ep in [self.filter.endpoint_in, self.filter.endpoint_out] {
            if !config.endpoints.contains(&ep) {
                return Err(AttachError::MissingEndpoint(ep));
            }
        }

        device.set_configuration(config.value, self.configure_timeout)?;
        debug!(value = config.value, "Configuration set");

        device.open_pipes(
            self.filter.interface,
            self.filter.endpoint_in,
            self.filter.endpoint_out,
        )
    }

    /// Release `candidate` if it is the bound (or binding) device.
    /// Returns true if a binding was dropped.
    pub fn detach(&self, candidate: &DeviceCandidate) -> bool {
        let mut inner = self.lock();
        inner.failed.retain(|f| !f.same_device(candidate));
        let bound = inner
            .binding
            .as_ref()
            .is_some_and(|b| b.device.same_device(candidate));
        let binding = inner
            .pending
            .as_ref()
            .is_some_and(|p| p.same_device(candidate));
        if bound || binding {
            self.unbind(&mut inner)
        } else {
            false
        }
    }

    /// Feed a hotplug notification.
    pub fn handle_event(&self, event: &HotplugEvent) -> Result<(), AttachError> {
        match event {
            HotplugEvent::Arrived(candidate) => {
                if !self.filter.matches(candidate) {
                    debug!(device = %candidate, "Ignoring non-NXT device");
                    return Ok(());
                }
                self.attach(candidate)
            }
            HotplugEvent::Left(candidate) => {
                self.detach(candidate);
                Ok(())
            }
        }
    }

    /// Reconcile against a full scan of the bus.
    pub fn refresh(&self, present: &[DeviceCandidate]) -> Result<(), AttachError> {
        let next = {
            let mut inner = self.lock();
            inner
                .failed
                .retain(|f| present.iter().any(|p| p.same_device(f)));

            let gone = inner
                .binding
                .as_ref()
                .filter(|b| !present.iter().any(|p| p.same_device(&b.device)))
                .map(|b| b.device.clone());
            if let Some(device) = gone {
                info!(device = %device, "Bound NXT no longer present");
                self.unbind(&mut inner);
            }

            if !inner.started || inner.binding.is_some() || inner.pending.is_some() {
                return Ok(());
            }
            present
                .iter()
                .find(|p| {
                    self.filter.matches(p) && !inner.failed.iter().any(|f| f.same_device(p))
                })
                .cloned()
        };

        match next {
            Some(candidate) => self.attach(&candidate),
            None => Ok(()),
        }
    }

    /// Started and bound to a brick.
    pub fn is_ready(&self) -> bool {
        let inner = self.lock();
        inner.started && inner.state == AttachState::Ready && inner.binding.is_some()
    }

    /// Snapshot the binding for one exchange.
    pub fn lease(&self) -> Option<Lease<TransportOf<H>>> {
        let inner = self.lock();
        if !inner.started {
            return None;
        }
        inner.binding.as_ref().map(|b| Lease {
            transport: Arc::clone(&b.transport),
            generation: self.generation.load(Ordering::SeqCst),
        })
    }

    /// Whether the binding `lease` was taken from is still the live one.
    pub fn is_current(&self, lease: &Lease<TransportOf<H>>) -> bool {
        self.generation.load(Ordering::SeqCst) == lease.generation && lease.transport.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use crate::transport::{MockHost, PluggedDevice};

    fn attachment(host: &MockHost) -> Attachment<MockHost> {
        Attachment::with_observer(
            host.clone(),
            DeviceFilter::default(),
            Duration::from_millis(50),
            Arc::new(NullObserver),
        )
    }

    #[test]
    fn test_attach_requires_start() {
        let host = MockHost::new();
        let brick = PluggedDevice::nxt("1", 3);
        host.plug(brick.clone());
        let att = attachment(&host);

        assert!(matches!(
            att.attach(&brick.candidate),
            Err(AttachError::NotStarted)
        ));
        assert!(!att.is_ready());
    }

    #[test]
    fn test_attach_and_detach() {
        let host = MockHost::new();
        let brick = PluggedDevice::nxt("1", 3);
        host.plug(brick.clone());
        let att = attachment(&host);
        att.start().unwrap();

        let g0 = att.generation();
        att.attach(&brick.candidate).unwrap();
        assert!(att.is_ready());
        assert_eq!(att.state(), AttachState::Ready);
        assert_eq!(att.generation(), g0 + 1);
        assert_eq!(att.bound_device(), Some(brick.candidate.clone()));

        assert!(att.detach(&brick.candidate));
        assert!(!att.is_ready());
        assert_eq!(att.state(), AttachState::Unbound);
        assert_eq!(att.generation(), g0 + 2);
        assert!(att.lease().is_none());
    }

    #[test]
    fn test_probe_rejects_wrong_ids() {
        let host = MockHost::new();
        let mut brick = PluggedDevice::nxt("1", 3);
        brick.candidate.product_id = 0x0003;
        host.plug(brick.clone());
        let att = attachment(&host);
        att.start().unwrap();

        assert!(matches!(
            att.attach(&brick.candidate),
            Err(AttachError::Rejected {
                vid: 0x0694,
                pid: 0x0003
            })
        ));
        assert_eq!(host.open_count(), 0);
        assert_eq!(att.state(), AttachState::Unbound);
    }

    #[test]
    fn test_bind_rejects_multiple_interfaces() {
        let host = MockHost::new();
        let mut brick = PluggedDevice::nxt("1", 3);
        brick.configuration.num_interfaces = 2;
        host.plug(brick.clone());
        let att = attachment(&host);
        att.start().unwrap();

        assert!(matches!(
            att.attach(&brick.candidate),
            Err(AttachError::InterfaceCount(2))
        ));
        assert_eq!(att.state(), AttachState::Unbound);
        assert!(!att.is_ready());
    }

    #[test]
    fn test_bind_rejects_missing_endpoint() {
        let host = MockHost::new();
        let mut brick = PluggedDevice::nxt("1", 3);
        brick.configuration.endpoints = vec![0x01, 0x81];
        host.plug(brick.clone());
        let att = attachment(&host);
        att.start().unwrap();

        assert!(matches!(
            att.attach(&brick.candidate),
            Err(AttachError::MissingEndpoint(0x82))
        ));
        assert!(!att.is_ready());
    }

    #[test]
    fn test_extra_endpoints_are_ignored() {
        let host = MockHost::new();
        let mut brick = PluggedDevice::nxt("1", 3);
        brick.configuration.endpoints = vec![0x83, 0x01, 0x02, 0x82];
        host.plug(brick.clone());
        let att = attachment(&host);
        att.start().unwrap();

        att.attach(&brick.candidate).unwrap();
        assert!(att.is_ready());
    }

    #[test]
    fn test_configure_timeout_returns_to_unbound() {
        let host = MockHost::new();
        let brick = PluggedDevice::nxt("1", 3);
        host.plug(brick.clone());
        host.stall_configure(true);
        let att = attachment(&host);
        att.start().unwrap();

        assert!(matches!(
            att.attach(&brick.candidate),
            Err(AttachError::ConfigureTimeout { timeout_ms: 50 })
        ));
        assert_eq!(att.state(), AttachState::Unbound);
    }

    #[test]
    fn test_second_attach_is_refused() {
        let host = MockHost::new();
        let first = PluggedDevice::nxt("1", 3);
        let second = PluggedDevice::nxt("1", 4);
        host.plug(first.clone());
        host.plug(second.clone());
        let att = attachment(&host);
        att.start().unwrap();

        att.attach(&first.candidate).unwrap();
        assert!(matches!(
            att.attach(&second.candidate),
            Err(AttachError::AlreadyBound(_))
        ));
        assert_eq!(att.bound_device(), Some(first.candidate));
    }

    #[test]
    fn test_detach_unrelated_is_noop() {
        let host = MockHost::new();
        let brick = PluggedDevice::nxt("1", 3);
        host.plug(brick.clone());
        let att = attachment(&host);
        att.start().unwrap();
        att.attach(&brick.candidate).unwrap();
        let g = att.generation();

        let other = PluggedDevice::nxt("2", 3).candidate;
        assert!(!att.detach(&other));
        assert!(att.is_ready());
        assert_eq!(att.generation(), g);
    }

    #[test]
    fn test_lease_goes_stale_on_detach() {
        let host = MockHost::new();
        let brick = PluggedDevice::nxt("1", 3);
        host.plug(brick.clone());
        let att = attachment(&host);
        att.start().unwrap();
        att.attach(&brick.candidate).unwrap();

        let lease = att.lease().unwrap();
        assert!(att.is_current(&lease));
        att.detach(&brick.candidate);
        assert!(!att.is_current(&lease));

        // Re-attaching does not revive the old lease.
        att.attach(&brick.candidate).unwrap();
        assert!(!att.is_current(&lease));
        assert!(att.is_current(&att.lease().unwrap()));
    }

    #[test]
    fn test_start_stop_resume_host_mode() {
        let host = MockHost::new();
        let brick = PluggedDevice::nxt("1", 3);
        host.plug(brick.clone());
        let att = attachment(&host);

        att.resume().unwrap();
        assert!(host.host_mode_calls().is_empty());

        att.start().unwrap();
        att.attach(&brick.candidate).unwrap();
        att.resume().unwrap();
        att.stop().unwrap();

        assert_eq!(host.host_mode_calls(), vec![true, true, false]);
        assert!(!att.is_ready());
        assert_eq!(att.state(), AttachState::Unbound);
    }

    #[test]
    fn test_hotplug_events() {
        let host = MockHost::new();
        let brick = PluggedDevice::nxt("1", 3);
        host.plug(brick.clone());
        let att = attachment(&host);
        att.start().unwrap();

        let mut mouse = PluggedDevice::nxt("1", 9).candidate;
        mouse.vendor_id = 0x046D;
        att.handle_event(&HotplugEvent::Arrived(mouse)).unwrap();
        assert!(!att.is_ready());

        att.handle_event(&HotplugEvent::Arrived(brick.candidate.clone()))
            .unwrap();
        assert!(att.is_ready());

        att.handle_event(&HotplugEvent::Left(brick.candidate.clone()))
            .unwrap();
        assert!(!att.is_ready());
    }

    #[test]
    fn test_refresh_binds_and_unbinds() {
        let host = MockHost::new();
        let brick = PluggedDevice::nxt("1", 3);
        let att = attachment(&host);
        att.start().unwrap();

        att.refresh(&host.scan().unwrap()).unwrap();
        assert!(!att.is_ready());

        host.plug(brick.clone());
        att.refresh(&host.scan().unwrap()).unwrap();
        assert!(att.is_ready());

        host.unplug(&brick.candidate);
        att.refresh(&host.scan().unwrap()).unwrap();
        assert!(!att.is_ready());
    }

    #[test]
    fn test_refresh_skips_failed_until_replugged() {
        let host = MockHost::new();
        let mut brick = PluggedDevice::nxt("1", 3);
        brick.configuration.num_interfaces = 2;
        host.plug(brick.clone());
        let att = attachment(&host);
        att.start().unwrap();

        assert!(att.refresh(&host.scan().unwrap()).is_err());
        assert!(att.refresh(&host.scan().unwrap()).is_ok());
        assert_eq!(host.open_count(), 1);

        host.unplug(&brick.candidate);
        att.refresh(&host.scan().unwrap()).unwrap();
        host.plug(PluggedDevice::nxt("1", 3));
        att.refresh(&host.scan().unwrap()).unwrap();
        assert!(att.is_ready());
    }
}
