//! Protocol module - NXT direct-command definitions.

pub mod command;
pub mod constants;
pub mod reply;
pub mod status;
pub mod types;

pub use command::Command;
pub use constants::*;
pub use reply::{BatteryLevel, FrameError, KeepAlive, ProgramName, Reply, ReplyHeader, decode_reply};
pub use status::Status;
pub use types::{
    InputPort, InputValues, MotorMode, OutputPort, OutputState, Regulation, RunState, SensorMode,
    SensorType, SetOutputState,
};
