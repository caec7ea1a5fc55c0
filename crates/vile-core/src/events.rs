//! Event system for UI decoupling.
//!
//! Lets the CLI (or any other front end) follow attachment and command
//! traffic without the core knowing how it is presented.

use std::fmt;

/// Attachment lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttachState {
    /// No brick bound.
    #[default]
    Unbound,
    /// A candidate is being matched against the device filter.
    Probing,
    /// Configuration and pipe setup in progress.
    Binding,
    /// Pipes are open; commands may be issued.
    Ready,
}

impl fmt::Display for AttachState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachState::Unbound => write!(f, "Unbound"),
            AttachState::Probing => write!(f, "Probing"),
            AttachState::Binding => write!(f, "Binding"),
            AttachState::Ready => write!(f, "Ready"),
        }
    }
}

/// Events emitted by the attachment and the session.
#[derive(Debug, Clone)]
pub enum NxtEvent {
    /// A brick was bound and is ready.
    DeviceAttached {
        vid: u16,
        pid: u16,
        bus_id: String,
        address: u8,
    },
    /// The bound brick went away or was released.
    DeviceDetached,
    /// Attachment state changed.
    StateChanged { from: AttachState, to: AttachState },
    /// USB packet sent/received.
    Packet {
        direction: PacketDirection,
        opcode: u8,
        length: usize,
        data: Option<Vec<u8>>,
    },
    /// A command did not complete successfully.
    CommandFailed { opcode: u8, message: String },
}

/// USB packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> brick
    Rx, // Brick -> host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving NXT events.
pub trait NxtObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &NxtEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl NxtObserver for NullObserver {
    fn on_event(&self, _event: &NxtEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl NxtObserver for TracingObserver {
    fn on_event(&self, event: &NxtEvent) {
        match event {
            NxtEvent::DeviceAttached {
                vid,
                pid,
                bus_id,
                address,
            } => {
                tracing::info!(
                    vid = %format!("{:04X}", vid),
                    pid = %format!("{:04X}", pid),
                    bus = %bus_id,
                    address,
                    "NXT attached"
                );
            }
            NxtEvent::DeviceDetached => {
                tracing::warn!("NXT detached");
            }
            NxtEvent::StateChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "Attach state changed");
            }
            NxtEvent::Packet {
                direction,
                opcode,
                length,
                ..
            } => {
                tracing::trace!(
                    dir = %direction,
                    opcode = %crate::protocol::opcode_name(*opcode),
                    len = length,
                    "USB Packet"
                );
            }
            NxtEvent::CommandFailed { opcode, message } => {
                tracing::error!(
                    opcode = %crate::protocol::opcode_name(*opcode),
                    "Command failed: {}",
                    message
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_state_display() {
        assert_eq!(AttachState::default(), AttachState::Unbound);
        assert_eq!(AttachState::Ready.to_string(), "Ready");
        assert_eq!(PacketDirection::Rx.to_string(), "RX");
    }
}
