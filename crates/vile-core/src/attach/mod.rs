//! Device attachment: host abstraction, binding state machine and hotplug.

pub mod host;
pub mod machine;
pub mod watcher;

pub use host::{
    AttachError, ConfigurationSummary, DeviceCandidate, HotplugEvent, UsbDevice, UsbHost,
};
pub use machine::{Attachment, Lease, TransportOf};
pub use watcher::Watcher;
