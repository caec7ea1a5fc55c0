//! Reply frame layouts and validation.
//!
//! The protocol is not self-describing: the caller picks the reply shape
//! from the command it sent. Every reply starts with `{type, opcode,
//! status}` and is validated in a fixed order before any payload byte is
//! looked at.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

use super::constants::{COMMAND_REPLY, FILENAME_FIELD_LEN, REPLY_HEADER_LEN};
use super::status::Status;
use super::types::{
    InputPort, InputValues, MotorMode, OutputPort, OutputState, Regulation, RunState, SensorMode,
    SensorType,
};

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame length mismatch: expected {expected}, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("Unexpected reply type 0x{actual:02X}")]
    ReplyType { actual: u8 },

    #[error("Opcode mismatch: sent 0x{expected:02X}, reply echoed 0x{actual:02X}")]
    Opcode { expected: u8, actual: u8 },

    #[error("Device reported status {0}")]
    Status(Status),

    #[error("Invalid {field} value 0x{value:02X}")]
    InvalidField { field: &'static str, value: u8 },

    #[error("{field} out of range: {value}, maximum {max}")]
    OutOfRange {
        field: &'static str,
        value: usize,
        max: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A fixed-size reply shape.
pub trait Reply: Sized {
    /// Exact frame size including the 3-byte header.
    const SIZE: usize;

    /// Parse the bytes following the header. `payload.len()` is always
    /// `SIZE - REPLY_HEADER_LEN`.
    fn parse_payload(payload: &[u8]) -> Result<Self, FrameError>;
}

/// The `{type, opcode, status}` header common to every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
    pub reply_type: u8,
    pub opcode: u8,
    pub status: Status,
}

impl ReplyHeader {
    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < REPLY_HEADER_LEN {
            return Err(FrameError::Length {
                expected: REPLY_HEADER_LEN,
                actual: data.len(),
            });
        }
        Ok(Self {
            reply_type: data[0],
            opcode: data[1],
            status: Status::from_u8(data[2]),
        })
    }
}

/// Validate `bytes` as the reply to `opcode` and decode its payload.
///
/// Checks run in order: exact length, reply tag, echoed opcode, status.
/// A short or garbled transfer is never read as a typed error reply.
pub fn decode_reply<R: Reply>(opcode: u8, bytes: &[u8]) -> Result<R, FrameError> {
    if bytes.len() != R::SIZE {
        return Err(FrameError::Length {
            expected: R::SIZE,
            actual: bytes.len(),
        });
    }
    let header = ReplyHeader::from_bytes(bytes)?;
    if header.reply_type != COMMAND_REPLY {
        return Err(FrameError::ReplyType {
            actual: header.reply_type,
        });
    }
    if header.opcode != opcode {
        return Err(FrameError::Opcode {
            expected: opcode,
            actual: header.opcode,
        });
    }
    if !header.status.is_ok() {
        return Err(FrameError::Status(header.status));
    }
    R::parse_payload(&bytes[REPLY_HEADER_LEN..])
}

/// Read a zero-terminated string out of a fixed-width field.
fn read_fixed_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Status-only reply.
impl Reply for () {
    const SIZE: usize = REPLY_HEADER_LEN;

    fn parse_payload(_payload: &[u8]) -> Result<Self, FrameError> {
        Ok(())
    }
}

/// Battery voltage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryLevel {
    pub millivolts: u16,
}

impl Reply for BatteryLevel {
    const SIZE: usize = REPLY_HEADER_LEN + 2;

    fn parse_payload(payload: &[u8]) -> Result<Self, FrameError> {
        let mut cursor = Cursor::new(payload);
        Ok(Self {
            millivolts: cursor.read_u16::<LittleEndian>()?,
        })
    }
}

/// Keep-alive reply carrying the brick's sleep timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    pub sleep_limit_ms: u32,
}

impl Reply for KeepAlive {
    const SIZE: usize = REPLY_HEADER_LEN + 4;

    fn parse_payload(payload: &[u8]) -> Result<Self, FrameError> {
        let mut cursor = Cursor::new(payload);
        Ok(Self {
            sleep_limit_ms: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

/// Name of the running program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramName(pub String);

impl Reply for ProgramName {
    const SIZE: usize = REPLY_HEADER_LEN + FILENAME_FIELD_LEN;

    fn parse_payload(payload: &[u8]) -> Result<Self, FrameError> {
        Ok(Self(read_fixed_str(payload)))
    }
}

impl Reply for OutputState {
    const SIZE: usize = REPLY_HEADER_LEN + 22;

    fn parse_payload(payload: &[u8]) -> Result<Self, FrameError> {
        let mut cursor = Cursor::new(payload);
        let port = cursor.read_u8()?;
        let power = cursor.read_i8()?;
        let mode = cursor.read_u8()?;
        let regulation = cursor.read_u8()?;
        let turn_ratio = cursor.read_i8()?;
        let run_state = cursor.read_u8()?;
        Ok(Self {
            port: OutputPort::from_u8(port).ok_or(FrameError::InvalidField {
                field: "output port",
                value: port,
            })?,
            power,
            mode: MotorMode::from_bits(mode),
            regulation: Regulation::from_u8(regulation),
            turn_ratio,
            run_state: RunState::from_u8(run_state),
            tacho_limit: cursor.read_u32::<LittleEndian>()?,
            tacho_count: cursor.read_i32::<LittleEndian>()?,
            block_tacho_count: cursor.read_i32::<LittleEndian>()?,
            rotation_count: cursor.read_i32::<LittleEndian>()?,
        })
    }
}

impl Reply for InputValues {
    const SIZE: usize = REPLY_HEADER_LEN + 13;

    fn parse_payload(payload: &[u8]) -> Result<Self, FrameError> {
        let mut cursor = Cursor::new(payload);
        let port = cursor.read_u8()?;
        let valid = cursor.read_u8()? != 0;
        let calibrated = cursor.read_u8()? != 0;
        let sensor_type = cursor.read_u8()?;
        let sensor_mode = cursor.read_u8()?;
        Ok(Self {
            port: InputPort::from_u8(port).ok_or(FrameError::InvalidField {
                field: "input port",
                value: port,
            })?,
            valid,
            calibrated,
            sensor_type: SensorType::from_u8(sensor_type),
            sensor_mode: SensorMode::from_u8(sensor_mode),
            raw_value: cursor.read_u16::<LittleEndian>()?,
            normalized_value: cursor.read_u16::<LittleEndian>()?,
            scaled_value: cursor.read_i16::<LittleEndian>()?,
            calibrated_value: cursor.read_i16::<LittleEndian>()?,
        })
    }
}

/// Bytes waiting in a low-speed port's receive buffer.
#[cfg(feature = "extensions")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LsStatus {
    pub bytes_ready: u8,
}

#[cfg(feature = "extensions")]
impl Reply for LsStatus {
    const SIZE: usize = REPLY_HEADER_LEN + 1;

    fn parse_payload(payload: &[u8]) -> Result<Self, FrameError> {
        Ok(Self {
            bytes_ready: payload[0],
        })
    }
}

/// Data read back from a low-speed (I2C) device.
#[cfg(feature = "extensions")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsData(pub Vec<u8>);

#[cfg(feature = "extensions")]
impl Reply for LsData {
    const SIZE: usize = REPLY_HEADER_LEN + 1 + super::constants::LS_DATA_LEN;

    fn parse_payload(payload: &[u8]) -> Result<Self, FrameError> {
        let read = payload[0] as usize;
        if read > super::constants::LS_DATA_LEN {
            return Err(FrameError::OutOfRange {
                field: "bytes read",
                value: read,
                max: super::constants::LS_DATA_LEN,
            });
        }
        Ok(Self(payload[1..1 + read].to_vec()))
    }
}

/// Message pulled from a mailbox.
#[cfg(feature = "extensions")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxMessage {
    pub local_inbox: u8,
    /// Message body without the trailing terminator.
    pub data: Vec<u8>,
}

#[cfg(feature = "extensions")]
impl MailboxMessage {
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

#[cfg(feature = "extensions")]
impl Reply for MailboxMessage {
    const SIZE: usize = REPLY_HEADER_LEN + 2 + super::constants::MESSAGE_FIELD_LEN;

    fn parse_payload(payload: &[u8]) -> Result<Self, FrameError> {
        let local_inbox = payload[0];
        let size = payload[1] as usize;
        let body = &payload[2..];
        if size > body.len() {
            return Err(FrameError::OutOfRange {
                field: "message size",
                value: size,
                max: body.len(),
            });
        }
        let mut data = body[..size].to_vec();
        if data.last() == Some(&0) {
            data.pop();
        }
        Ok(Self { local_inbox, data })
    }
}
