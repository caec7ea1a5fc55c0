//! Command frame layouts.
//!
//! Each direct command has a fixed frame size that is part of the wire
//! contract: the brick checks exact byte counts, not just the opcode.
//! Frames are built zeroed, so padding and unused string bytes are always 0.

use byteorder::{ByteOrder, LittleEndian};

use super::constants::*;
use super::reply::{BatteryLevel, KeepAlive, ProgramName, Reply};
use super::types::{
    InputPort, InputValues, OutputPort, OutputState, SensorMode, SensorType, SetOutputState,
};

#[cfg(feature = "extensions")]
use super::reply::{FrameError, LsData, LsStatus, MailboxMessage};

/// A direct command with a fixed layout and a known reply shape.
pub trait Command {
    const OPCODE: u8;
    /// Total frame size including the class and opcode bytes.
    const SIZE: usize;
    type Reply: Reply;

    /// Fill the payload. `payload` is zeroed and exactly `SIZE - 2` bytes.
    fn write_payload(&self, payload: &mut [u8]);

    /// Encode as a direct command that expects a reply.
    fn encode(&self) -> Vec<u8> {
        self.encode_with_class(DIRECT_COMMAND_REPLY)
    }

    fn encode_with_class(&self, class: u8) -> Vec<u8> {
        let mut frame = vec![0u8; Self::SIZE];
        frame[0] = class;
        frame[1] = Self::OPCODE;
        self.write_payload(&mut frame[2..]);
        frame
    }
}

/// Copy `value` into a fixed-width string field, silently truncating so the
/// last byte stays zero.
fn write_fixed_str(field: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(field.len().saturating_sub(1));
    field[..len].copy_from_slice(&bytes[..len]);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartProgram {
    pub filename: String,
}

impl StartProgram {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
        }
    }
}

impl Command for StartProgram {
    const OPCODE: u8 = OPCODE_START_PROGRAM;
    const SIZE: usize = 2 + FILENAME_FIELD_LEN;
    type Reply = ();

    fn write_payload(&self, payload: &mut [u8]) {
        write_fixed_str(payload, &self.filename);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopProgram;

impl Command for StopProgram {
    const OPCODE: u8 = OPCODE_STOP_PROGRAM;
    const SIZE: usize = 2;
    type Reply = ();

    fn write_payload(&self, _payload: &mut [u8]) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaySoundFile {
    pub looping: bool,
    pub filename: String,
}

impl PlaySoundFile {
    pub fn new(filename: impl Into<String>, looping: bool) -> Self {
        Self {
            looping,
            filename: filename.into(),
        }
    }
}

impl Command for PlaySoundFile {
    const OPCODE: u8 = OPCODE_PLAY_SOUND_FILE;
    const SIZE: usize = 3 + FILENAME_FIELD_LEN;
    type Reply = ();

    fn write_payload(&self, payload: &mut [u8]) {
        payload[0] = u8::from(self.looping);
        write_fixed_str(&mut payload[1..], &self.filename);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayTone {
    pub frequency_hz: u16,
    pub duration_ms: u16,
}

impl Command for PlayTone {
    const OPCODE: u8 = OPCODE_PLAY_TONE;
    const SIZE: usize = 6;
    type Reply = ();

    fn write_payload(&self, payload: &mut [u8]) {
        LittleEndian::write_u16(&mut payload[0..2], self.frequency_hz);
        LittleEndian::write_u16(&mut payload[2..4], self.duration_ms);
    }
}

impl Command for SetOutputState {
    const OPCODE: u8 = OPCODE_SET_OUTPUT_STATE;
    const SIZE: usize = 12;
    type Reply = ();

    fn write_payload(&self, payload: &mut [u8]) {
        payload[0] = self.port.code();
        payload[1] = self.power as u8;
        payload[2] = self.mode.bits();
        payload[3] = self.regulation.code();
        payload[4] = self.turn_ratio as u8;
        payload[5] = self.run_state.code();
        LittleEndian::write_u32(&mut payload[6..10], self.tacho_limit);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetInputMode {
    pub port: InputPort,
    pub sensor_type: SensorType,
    pub sensor_mode: SensorMode,
}

impl Command for SetInputMode {
    const OPCODE: u8 = OPCODE_SET_INPUT_MODE;
    const SIZE: usize = 5;
    type Reply = ();

    fn write_payload(&self, payload: &mut [u8]) {
        payload[0] = self.port.code();
        payload[1] = self.sensor_type.code();
        payload[2] = self.sensor_mode.code();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOutputState {
    pub port: OutputPort,
}

impl Command for GetOutputState {
    const OPCODE: u8 = OPCODE_GET_OUTPUT_STATE;
    const SIZE: usize = 3;
    type Reply = OutputState;

    fn write_payload(&self, payload: &mut [u8]) {
        payload[0] = self.port.code();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetInputValues {
    pub port: InputPort,
}

impl Command for GetInputValues {
    const OPCODE: u8 = OPCODE_GET_INPUT_VALUES;
    const SIZE: usize = 3;
    type Reply = InputValues;

    fn write_payload(&self, payload: &mut [u8]) {
        payload[0] = self.port.code();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetInputScaledValue {
    pub port: InputPort,
}

impl Command for ResetInputScaledValue {
    const OPCODE: u8 = OPCODE_RESET_INPUT_SCALED_VALUE;
    const SIZE: usize = 3;
    type Reply = ();

    fn write_payload(&self, payload: &mut [u8]) {
        payload[0] = self.port.code();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetMotorPosition {
    pub port: OutputPort,
    /// Reset relative to the last movement instead of the absolute position.
    pub relative: bool,
}

impl Command for ResetMotorPosition {
    const OPCODE: u8 = OPCODE_RESET_MOTOR_POSITION;
    const SIZE: usize = 4;
    type Reply = ();

    fn write_payload(&self, payload: &mut [u8]) {
        payload[0] = self.port.code();
        payload[1] = u8::from(self.relative);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetBatteryLevel;

impl Command for GetBatteryLevel {
    const OPCODE: u8 = OPCODE_GET_BATTERY_LEVEL;
    const SIZE: usize = 2;
    type Reply = BatteryLevel;

    fn write_payload(&self, _payload: &mut [u8]) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopSound;

impl Command for StopSound {
    const OPCODE: u8 = OPCODE_STOP_SOUND;
    const SIZE: usize = 2;
    type Reply = ();

    fn write_payload(&self, _payload: &mut [u8]) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveRequest;

impl Command for KeepAliveRequest {
    const OPCODE: u8 = OPCODE_KEEP_ALIVE;
    const SIZE: usize = 2;
    type Reply = KeepAlive;

    fn write_payload(&self, _payload: &mut [u8]) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetCurrentProgramName;

impl Command for GetCurrentProgramName {
    const OPCODE: u8 = OPCODE_GET_CURRENT_PROGRAM_NAME;
    const SIZE: usize = 2;
    type Reply = ProgramName;

    fn write_payload(&self, _payload: &mut [u8]) {}
}

#[cfg(feature = "extensions")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LsGetStatus {
    pub port: InputPort,
}

#[cfg(feature = "extensions")]
impl Command for LsGetStatus {
    const OPCODE: u8 = OPCODE_LS_GET_STATUS;
    const SIZE: usize = 3;
    type Reply = LsStatus;

    fn write_payload(&self, payload: &mut [u8]) {
        payload[0] = self.port.code();
    }
}

/// Write to a low-speed (I2C) device and request `rx_len` bytes back.
#[cfg(feature = "extensions")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsWrite {
    port: InputPort,
    data: Vec<u8>,
    rx_len: u8,
}

#[cfg(feature = "extensions")]
impl LsWrite {
    pub fn new(port: InputPort, data: &[u8], rx_len: u8) -> Result<Self, FrameError> {
        if data.len() > LS_DATA_LEN {
            return Err(FrameError::OutOfRange {
                field: "low-speed tx data",
                value: data.len(),
                max: LS_DATA_LEN,
            });
        }
        if rx_len as usize > LS_DATA_LEN {
            return Err(FrameError::OutOfRange {
                field: "low-speed rx length",
                value: rx_len as usize,
                max: LS_DATA_LEN,
            });
        }
        Ok(Self {
            port,
            data: data.to_vec(),
            rx_len,
        })
    }
}

#[cfg(feature = "extensions")]
impl Command for LsWrite {
    const OPCODE: u8 = OPCODE_LS_WRITE;
    const SIZE: usize = 5 + LS_DATA_LEN;
    type Reply = ();

    fn write_payload(&self, payload: &mut [u8]) {
        payload[0] = self.port.code();
        payload[1] = self.data.len() as u8;
        payload[2] = self.rx_len;
        payload[3..3 + self.data.len()].copy_from_slice(&self.data);
    }
}

#[cfg(feature = "extensions")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LsRead {
    pub port: InputPort,
}

#[cfg(feature = "extensions")]
impl Command for LsRead {
    const OPCODE: u8 = OPCODE_LS_READ;
    const SIZE: usize = 3;
    type Reply = LsData;

    fn write_payload(&self, payload: &mut [u8]) {
        payload[0] = self.port.code();
    }
}

/// Post a message into one of the brick's mailboxes.
#[cfg(feature = "extensions")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageWrite {
    inbox: u8,
    message: Vec<u8>,
}

#[cfg(feature = "extensions")]
impl MessageWrite {
    /// The size byte on the wire counts the terminator, so at most
    /// `MESSAGE_FIELD_LEN - 1` bytes of body fit.
    pub fn new(inbox: u8, message: &[u8]) -> Result<Self, FrameError> {
        if inbox >= MAILBOX_COUNT {
            return Err(FrameError::OutOfRange {
                field: "inbox",
                value: inbox as usize,
                max: MAILBOX_COUNT as usize - 1,
            });
        }
        if message.len() >= MESSAGE_FIELD_LEN {
            return Err(FrameError::OutOfRange {
                field: "message length",
                value: message.len(),
                max: MESSAGE_FIELD_LEN - 1,
            });
        }
        Ok(Self {
            inbox,
            message: message.to_vec(),
        })
    }
}

#[cfg(feature = "extensions")]
impl Command for MessageWrite {
    const OPCODE: u8 = OPCODE_MESSAGE_WRITE;
    const SIZE: usize = 4 + MESSAGE_FIELD_LEN;
    type Reply = ();

    fn write_payload(&self, payload: &mut [u8]) {
        payload[0] = self.inbox;
        payload[1] = self.message.len() as u8 + 1;
        payload[2..2 + self.message.len()].copy_from_slice(&self.message);
    }
}

#[cfg(feature = "extensions")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRead {
    pub remote_inbox: u8,
    pub local_inbox: u8,
    /// Remove the message from the remote inbox once read.
    pub remove: bool,
}

#[cfg(feature = "extensions")]
impl Command for MessageRead {
    const OPCODE: u8 = OPCODE_MESSAGE_READ;
    const SIZE: usize = 5;
    type Reply = MailboxMessage;

    fn write_payload(&self, payload: &mut [u8]) {
        payload[0] = self.remote_inbox;
        payload[1] = self.local_inbox;
        payload[2] = u8::from(self.remove);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::reply::decode_reply;
    use crate::protocol::types::{MotorMode, Regulation, RunState};

    fn assert_frame<C: Command>(cmd: &C, expected: &[u8]) {
        let frame = cmd.encode();
        assert_eq!(frame.len(), C::SIZE);
        assert_eq!(frame, expected);
    }

    #[test]
    fn test_start_program_frame() {
        let frame = StartProgram::new("DEMO.rxe").encode();
        assert_eq!(frame.len(), 22);
        assert_eq!(&frame[..2], &[0x00, 0x00]);
        assert_eq!(&frame[2..10], b"DEMO.rxe");
        assert!(frame[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_filename_truncation() {
        let frame = StartProgram::new("ANAMETHATISWAYTOOLONG.rxe").encode();
        assert_eq!(frame.len(), StartProgram::SIZE);
        assert_eq!(&frame[2..21], b"ANAMETHATISWAYTOOLO");
        assert_eq!(frame[21], 0);
    }

    #[test]
    fn test_play_sound_frame() {
        let frame = PlaySoundFile::new("Woops.rso", true).encode();
        assert_eq!(frame.len(), 23);
        assert_eq!(&frame[..3], &[0x00, 0x02, 0x01]);
        assert_eq!(&frame[3..12], b"Woops.rso");
        assert_eq!(frame[22], 0);
    }

    #[test]
    fn test_fixed_frames() {
        assert_frame(&StopProgram, &[0x00, 0x01]);
        assert_frame(&GetBatteryLevel, &[0x00, 0x0B]);
        assert_frame(&StopSound, &[0x00, 0x0C]);
        assert_frame(&KeepAliveRequest, &[0x00, 0x0D]);
        assert_frame(&GetCurrentProgramName, &[0x00, 0x11]);
        assert_frame(
            &PlayTone {
                frequency_hz: 440,
                duration_ms: 500,
            },
            &[0x00, 0x03, 0xB8, 0x01, 0xF4, 0x01],
        );
        assert_frame(
            &GetOutputState {
                port: OutputPort::C,
            },
            &[0x00, 0x06, 0x02],
        );
        assert_frame(
            &GetInputValues {
                port: InputPort::Two,
            },
            &[0x00, 0x07, 0x01],
        );
        assert_frame(
            &ResetInputScaledValue {
                port: InputPort::Four,
            },
            &[0x00, 0x08, 0x03],
        );
        assert_frame(
            &ResetMotorPosition {
                port: OutputPort::A,
                relative: true,
            },
            &[0x00, 0x0A, 0x00, 0x01],
        );
        assert_frame(
            &SetInputMode {
                port: InputPort::One,
                sensor_type: SensorType::Switch,
                sensor_mode: SensorMode::Boolean,
            },
            &[0x00, 0x05, 0x00, 0x01, 0x20],
        );
    }

    #[test]
    fn test_set_output_state_frame() {
        let cmd = SetOutputState {
            port: OutputPort::B,
            power: -50,
            mode: MotorMode::ON | MotorMode::REGULATED,
            regulation: Regulation::Speed,
            turn_ratio: 0,
            run_state: RunState::Running,
            tacho_limit: 720,
        };
        assert_frame(
            &cmd,
            &[
                0x00, 0x04, 0x01, 0xCE, 0x05, 0x01, 0x00, 0x20, 0xD0, 0x02, 0x00, 0x00,
            ],
        );
    }

    #[test]
    fn test_no_reply_class() {
        let frame = PlayTone {
            frequency_hz: 1000,
            duration_ms: 100,
        }
        .encode_with_class(DIRECT_COMMAND_NO_REPLY);
        assert_eq!(frame[0], 0x80);
        assert_eq!(frame[1], OPCODE_PLAY_TONE);
    }

    #[test]
    fn test_start_program_replies() {
        type R = <StartProgram as Command>::Reply;
        assert!(decode_reply::<R>(StartProgram::OPCODE, &[0x02, 0x00, 0x00]).is_ok());
        assert!(decode_reply::<R>(StartProgram::OPCODE, &[0x02, 0x00, 0xBD]).is_err());
    }

    #[cfg(feature = "extensions")]
    #[test]
    fn test_ls_write_frame() {
        let cmd = LsWrite::new(InputPort::Four, &[0x02, 0x42], 1).unwrap();
        let frame = cmd.encode();
        assert_eq!(frame.len(), 21);
        assert_eq!(&frame[..7], &[0x00, 0x0F, 0x03, 0x02, 0x01, 0x02, 0x42]);
        assert!(frame[7..].iter().all(|&b| b == 0));
    }

    #[cfg(feature = "extensions")]
    #[test]
    fn test_ls_write_rejects_oversized_data() {
        assert!(LsWrite::new(InputPort::One, &[0u8; 17], 0).is_err());
        assert!(LsWrite::new(InputPort::One, &[0u8; 1], 17).is_err());
    }

    #[cfg(feature = "extensions")]
    #[test]
    fn test_message_write_frame() {
        let frame = MessageWrite::new(2, b"go").unwrap().encode();
        assert_eq!(frame.len(), 63);
        assert_eq!(&frame[..6], &[0x00, 0x09, 0x02, 0x03, b'g', b'o']);
        assert_eq!(frame[6], 0);
        assert!(MessageWrite::new(10, b"x").is_err());
        assert!(MessageWrite::new(0, &[b'a'; 59]).is_err());
    }

    #[cfg(feature = "extensions")]
    #[test]
    fn test_message_read_frame() {
        assert_frame(
            &MessageRead {
                remote_inbox: 11,
                local_inbox: 1,
                remove: true,
            },
            &[0x00, 0x13, 0x0B, 0x01, 0x01],
        );
    }
}
