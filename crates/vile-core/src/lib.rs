//! Vile-Core: LEGO Mindstorms NXT USB driver in Rust.
//!
//! This crate binds to an NXT brick on the host's USB bus and exposes its
//! direct-command set (programs, sound, motors, sensors, battery) as typed
//! blocking calls.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Opcodes, status codes, command and reply frame layouts
//! - **Transport**: Bulk pipe abstraction (nusb, mock)
//! - **Attach**: Device binding state machine and hotplug watcher
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: The command API
//! - **Config**: TOML session configuration
//!
//! # Example
//!
//! ```no_run
//! use vile_core::{NxtSession, SessionConfig};
//!
//! let session = NxtSession::connect(&SessionConfig::default()).expect("no brick");
//! let mv = session.battery_level().expect("battery query failed");
//! println!("{} mV", mv);
//! ```

pub mod attach;
pub mod config;
pub mod events;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use attach::{AttachError, Attachment, DeviceCandidate, HotplugEvent, Watcher};
pub use config::{DeviceFilter, SessionConfig};
pub use events::{AttachState, NxtEvent, NxtObserver, PacketDirection, TracingObserver};
pub use protocol::{
    FrameError, InputPort, InputValues, MotorMode, OutputPort, OutputState, Regulation, RunState,
    SensorMode, SensorType, SetOutputState, Status,
};
pub use session::{CommandError, NxtSession};
pub use transport::{MockTransport, NusbHost, NusbTransport, TransportError, UsbTransport};
