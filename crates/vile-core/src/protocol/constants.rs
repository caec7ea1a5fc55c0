//! Protocol constants for the NXT direct-command protocol over USB.

// ============================================================================
// Device Identification
// ============================================================================

/// LEGO Group Vendor ID
pub const LEGO_VENDOR_ID: u16 = 0x0694;

/// NXT brick Product ID
pub const NXT_PRODUCT_ID: u16 = 0x0002;

/// The brick exposes a single interface.
pub const NXT_INTERFACE: u8 = 0;

/// Bulk OUT endpoint (host -> brick commands)
pub const NXT_ENDPOINT_OUT: u8 = 0x01;

/// Bulk IN endpoint (brick -> host replies)
pub const NXT_ENDPOINT_IN: u8 = 0x82;

// ============================================================================
// Transfer Limits
// ============================================================================

/// Maximum size of a single IN transfer. No reply exceeds one full-speed packet.
pub const READ_SIZE: usize = 64;

/// Default per-transfer timeout.
pub const DEFAULT_TRANSFER_TIMEOUT_MS: u64 = 1000;

/// Default wait for the set-configuration request during bind.
pub const DEFAULT_CONFIGURE_TIMEOUT_MS: u64 = 5000;

/// Default hotplug polling interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Filename field width, including the reserved terminator.
pub const FILENAME_FIELD_LEN: usize = 20;

/// Low-speed (I2C) data buffer size.
pub const LS_DATA_LEN: usize = 16;

/// Mailbox message field width, including the terminator.
pub const MESSAGE_FIELD_LEN: usize = 59;

/// Number of mailboxes on the brick.
pub const MAILBOX_COUNT: u8 = 10;

// ============================================================================
// Command Classes (first byte of every frame)
// ============================================================================

pub const DIRECT_COMMAND_REPLY: u8 = 0x00;
pub const SYSTEM_COMMAND_REPLY: u8 = 0x01;
/// Tag carried by every reply frame.
pub const COMMAND_REPLY: u8 = 0x02;
pub const DIRECT_COMMAND_NO_REPLY: u8 = 0x80;
pub const SYSTEM_COMMAND_NO_REPLY: u8 = 0x81;

/// Size of the `{type, opcode, status}` header at the start of every reply.
pub const REPLY_HEADER_LEN: usize = 3;

// ============================================================================
// Direct Command Opcodes
// ============================================================================

pub const OPCODE_START_PROGRAM: u8 = 0x00;
pub const OPCODE_STOP_PROGRAM: u8 = 0x01;
pub const OPCODE_PLAY_SOUND_FILE: u8 = 0x02;
pub const OPCODE_PLAY_TONE: u8 = 0x03;
pub const OPCODE_SET_OUTPUT_STATE: u8 = 0x04;
pub const OPCODE_SET_INPUT_MODE: u8 = 0x05;
pub const OPCODE_GET_OUTPUT_STATE: u8 = 0x06;
pub const OPCODE_GET_INPUT_VALUES: u8 = 0x07;
pub const OPCODE_RESET_INPUT_SCALED_VALUE: u8 = 0x08;
pub const OPCODE_MESSAGE_WRITE: u8 = 0x09;
pub const OPCODE_RESET_MOTOR_POSITION: u8 = 0x0A;
pub const OPCODE_GET_BATTERY_LEVEL: u8 = 0x0B;
pub const OPCODE_STOP_SOUND: u8 = 0x0C;
pub const OPCODE_KEEP_ALIVE: u8 = 0x0D;
pub const OPCODE_LS_GET_STATUS: u8 = 0x0E;
pub const OPCODE_LS_WRITE: u8 = 0x0F;
pub const OPCODE_LS_READ: u8 = 0x10;
pub const OPCODE_GET_CURRENT_PROGRAM_NAME: u8 = 0x11;
pub const OPCODE_MESSAGE_READ: u8 = 0x13;

// ============================================================================
// System Command Opcodes
//
// File and firmware operations. Defined for completeness; the command API
// does not expose them.
// ============================================================================

pub const SYS_OPEN_READ: u8 = 0x80;
pub const SYS_OPEN_WRITE: u8 = 0x81;
pub const SYS_READ: u8 = 0x82;
pub const SYS_WRITE: u8 = 0x83;
pub const SYS_CLOSE: u8 = 0x84;
pub const SYS_DELETE: u8 = 0x85;
pub const SYS_FIND_FIRST: u8 = 0x86;
pub const SYS_FIND_NEXT: u8 = 0x87;
pub const SYS_GET_FIRMWARE_VERSION: u8 = 0x88;
pub const SYS_OPEN_WRITE_LINEAR: u8 = 0x89;
pub const SYS_OPEN_READ_LINEAR: u8 = 0x8A;
pub const SYS_OPEN_WRITE_DATA: u8 = 0x8B;
pub const SYS_OPEN_APPEND_DATA: u8 = 0x8C;
pub const SYS_BOOT: u8 = 0x97;
pub const SYS_SET_BRICK_NAME: u8 = 0x98;
pub const SYS_GET_DEVICE_INFO: u8 = 0x9B;
pub const SYS_DELETE_USER_FLASH: u8 = 0xA0;
pub const SYS_POLL_COMMAND_LENGTH: u8 = 0xA1;
pub const SYS_POLL_COMMAND: u8 = 0xA2;
pub const SYS_BLUETOOTH_FACTORY_RESET: u8 = 0xA4;

/// Human-readable name for a direct or system opcode.
pub fn opcode_name(opcode: u8) -> &'static str {
    match opcode {
        OPCODE_START_PROGRAM => "StartProgram",
        OPCODE_STOP_PROGRAM => "StopProgram",
        OPCODE_PLAY_SOUND_FILE => "PlaySoundFile",
        OPCODE_PLAY_TONE => "PlayTone",
        OPCODE_SET_OUTPUT_STATE => "SetOutputState",
        OPCODE_SET_INPUT_MODE => "SetInputMode",
        OPCODE_GET_OUTPUT_STATE => "GetOutputState",
        OPCODE_GET_INPUT_VALUES => "GetInputValues",
        OPCODE_RESET_INPUT_SCALED_VALUE => "ResetInputScaledValue",
        OPCODE_MESSAGE_WRITE => "MessageWrite",
        OPCODE_RESET_MOTOR_POSITION => "ResetMotorPosition",
        OPCODE_GET_BATTERY_LEVEL => "GetBatteryLevel",
        OPCODE_STOP_SOUND => "StopSound",
        OPCODE_KEEP_ALIVE => "KeepAlive",
        OPCODE_LS_GET_STATUS => "LsGetStatus",
        OPCODE_LS_WRITE => "LsWrite",
        OPCODE_LS_READ => "LsRead",
        OPCODE_GET_CURRENT_PROGRAM_NAME => "GetCurrentProgramName",
        OPCODE_MESSAGE_READ => "MessageRead",
        SYS_OPEN_READ..=SYS_BLUETOOTH_FACTORY_RESET => "SystemCommand",
        _ => "Unknown",
    }
}
