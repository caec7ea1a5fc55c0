//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod traits;

pub use mock::{MockDevice, MockHost, MockTransport, PluggedDevice};
pub use nusb::{NusbDevice, NusbHost, NusbTransport};
pub use traits::{TransportError, UsbTransport};
