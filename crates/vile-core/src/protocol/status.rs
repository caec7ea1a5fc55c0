//! Reply status byte parsing.
//!
//! Every reply header carries a status byte reported by the brick. Only
//! `Ok` means the command succeeded; the rest are kept distinct so callers
//! can tell a missing file from a busy channel.

use std::fmt;

/// Device-reported status from a reply header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    Pending,
    QueueEmpty,
    NoMoreHandles,
    NoSpace,
    NoMoreFiles,
    EndOfFileExpected,
    EndOfFile,
    NotALinearFile,
    FileNotFound,
    HandleAlreadyClosed,
    NoLinearSpace,
    UndefinedError,
    FileBusy,
    NoWriteBuffers,
    AppendImpossible,
    FileIsFull,
    FileExists,
    ModuleNotFound,
    OutOfBoundary,
    IllegalFilename,
    IllegalHandle,
    RequestFailed,
    UnknownOpcode,
    InsanePacket,
    DataOutOfRange,
    CommunicationError,
    NoBuffer,
    ChannelInvalid,
    ChannelBusy,
    NoActiveProgram,
    IllegalSize,
    IllegalMailbox,
    IllegalField,
    BadIo,
    NoMemory,
    BadArgs,
    /// A code outside the documented table.
    Unknown(u8),
}

impl Status {
    pub fn from_u8(code: u8) -> Self {
        match code {
            0x00 => Status::Ok,
            0x20 => Status::Pending,
            0x40 => Status::QueueEmpty,
            0x81 => Status::NoMoreHandles,
            0x82 => Status::NoSpace,
            0x83 => Status::NoMoreFiles,
            0x84 => Status::EndOfFileExpected,
            0x85 => Status::EndOfFile,
            0x86 => Status::NotALinearFile,
            0x87 => Status::FileNotFound,
            0x88 => Status::HandleAlreadyClosed,
            0x89 => Status::NoLinearSpace,
            0x8A => Status::UndefinedError,
            0x8B => Status::FileBusy,
            0x8C => Status::NoWriteBuffers,
            0x8D => Status::AppendImpossible,
            0x8E => Status::FileIsFull,
            0x8F => Status::FileExists,
            0x90 => Status::ModuleNotFound,
            0x91 => Status::OutOfBoundary,
            0x92 => Status::IllegalFilename,
            0x93 => Status::IllegalHandle,
            0xBD => Status::RequestFailed,
            0xBE => Status::UnknownOpcode,
            0xBF => Status::InsanePacket,
            0xC0 => Status::DataOutOfRange,
            0xDD => Status::CommunicationError,
            0xDE => Status::NoBuffer,
            0xDF => Status::ChannelInvalid,
            0xE0 => Status::ChannelBusy,
            0xEC => Status::NoActiveProgram,
            0xED => Status::IllegalSize,
            0xEE => Status::IllegalMailbox,
            0xEF => Status::IllegalField,
            0xF0 => Status::BadIo,
            0xFB => Status::NoMemory,
            0xFF => Status::BadArgs,
            other => Status::Unknown(other),
        }
    }

    /// Raw wire value.
    pub fn code(&self) -> u8 {
        match self {
            Status::Ok => 0x00,
            Status::Pending => 0x20,
            Status::QueueEmpty => 0x40,
            Status::NoMoreHandles => 0x81,
            Status::NoSpace => 0x82,
            Status::NoMoreFiles => 0x83,
            Status::EndOfFileExpected => 0x84,
            Status::EndOfFile => 0x85,
            Status::NotALinearFile => 0x86,
            Status::FileNotFound => 0x87,
            Status::HandleAlreadyClosed => 0x88,
            Status::NoLinearSpace => 0x89,
            Status::UndefinedError => 0x8A,
            Status::FileBusy => 0x8B,
            Status::NoWriteBuffers => 0x8C,
            Status::AppendImpossible => 0x8D,
            Status::FileIsFull => 0x8E,
            Status::FileExists => 0x8F,
            Status::ModuleNotFound => 0x90,
            Status::OutOfBoundary => 0x91,
            Status::IllegalFilename => 0x92,
            Status::IllegalHandle => 0x93,
            Status::RequestFailed => 0xBD,
            Status::UnknownOpcode => 0xBE,
            Status::InsanePacket => 0xBF,
            Status::DataOutOfRange => 0xC0,
            Status::CommunicationError => 0xDD,
            Status::NoBuffer => 0xDE,
            Status::ChannelInvalid => 0xDF,
            Status::ChannelBusy => 0xE0,
            Status::NoActiveProgram => 0xEC,
            Status::IllegalSize => 0xED,
            Status::IllegalMailbox => 0xEE,
            Status::IllegalField => 0xEF,
            Status::BadIo => 0xF0,
            Status::NoMemory => 0xFB,
            Status::BadArgs => 0xFF,
            Status::Unknown(code) => *code,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Status::Ok => "success",
            Status::Pending => "pending communication transaction in progress",
            Status::QueueEmpty => "specified mailbox queue is empty",
            Status::NoMoreHandles => "no more handles",
            Status::NoSpace => "no space",
            Status::NoMoreFiles => "no more files",
            Status::EndOfFileExpected => "end of file expected",
            Status::EndOfFile => "end of file",
            Status::NotALinearFile => "not a linear file",
            Status::FileNotFound => "file not found",
            Status::HandleAlreadyClosed => "handle already closed",
            Status::NoLinearSpace => "no linear space",
            Status::UndefinedError => "undefined error",
            Status::FileBusy => "file is busy",
            Status::NoWriteBuffers => "no write buffers",
            Status::AppendImpossible => "append not possible",
            Status::FileIsFull => "file is full",
            Status::FileExists => "file exists",
            Status::ModuleNotFound => "module not found",
            Status::OutOfBoundary => "out of boundary",
            Status::IllegalFilename => "illegal file name",
            Status::IllegalHandle => "illegal handle",
            Status::RequestFailed => "request failed (file not found?)",
            Status::UnknownOpcode => "unknown command opcode",
            Status::InsanePacket => "insane packet",
            Status::DataOutOfRange => "data contains out-of-range values",
            Status::CommunicationError => "communication bus error",
            Status::NoBuffer => "no free memory in communication buffer",
            Status::ChannelInvalid => "specified channel/connection is not valid",
            Status::ChannelBusy => "specified channel/connection not configured or busy",
            Status::NoActiveProgram => "no active program",
            Status::IllegalSize => "illegal size specified",
            Status::IllegalMailbox => "illegal mailbox queue id specified",
            Status::IllegalField => "attempted to access invalid field of a structure",
            Status::BadIo => "bad input or output specified",
            Status::NoMemory => "insufficient memory available",
            Status::BadArgs => "bad arguments",
            Status::Unknown(_) => "unknown status",
        }
    }
}

impl From<u8> for Status {
    fn from(code: u8) -> Self {
        Status::from_u8(code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X} ({})", self.code(), self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_code_maps_back() {
        for code in 0..=u8::MAX {
            assert_eq!(Status::from_u8(code).code(), code);
        }
    }

    #[test]
    fn test_known_codes() {
        assert!(Status::from_u8(0x00).is_ok());
        assert_eq!(Status::from_u8(0xBD), Status::RequestFailed);
        assert_eq!(Status::from_u8(0xEC), Status::NoActiveProgram);
        assert_eq!(Status::from_u8(0x13), Status::Unknown(0x13));
    }

    #[test]
    fn test_pending_is_not_ok() {
        assert!(!Status::Pending.is_ok());
        assert!(!Status::QueueEmpty.is_ok());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Status::RequestFailed.to_string(),
            "0xBD (request failed (file not found?))"
        );
    }
}
