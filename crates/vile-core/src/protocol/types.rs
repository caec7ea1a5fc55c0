//! Typed values carried inside command and reply payloads.

use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

/// Motor output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputPort {
    A,
    B,
    C,
    /// Broadcast to all three outputs (set commands only).
    All,
}

impl OutputPort {
    pub fn code(self) -> u8 {
        match self {
            OutputPort::A => 0x00,
            OutputPort::B => 0x01,
            OutputPort::C => 0x02,
            OutputPort::All => 0xFF,
        }
    }

    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(OutputPort::A),
            0x01 => Some(OutputPort::B),
            0x02 => Some(OutputPort::C),
            0xFF => Some(OutputPort::All),
            _ => None,
        }
    }
}

impl FromStr for OutputPort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a" => Ok(OutputPort::A),
            "b" => Ok(OutputPort::B),
            "c" => Ok(OutputPort::C),
            "all" => Ok(OutputPort::All),
            other => Err(format!("invalid output port '{other}' (expected a, b, c or all)")),
        }
    }
}

impl fmt::Display for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputPort::A => write!(f, "A"),
            OutputPort::B => write!(f, "B"),
            OutputPort::C => write!(f, "C"),
            OutputPort::All => write!(f, "ALL"),
        }
    }
}

/// Sensor input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputPort {
    One,
    Two,
    Three,
    Four,
}

impl InputPort {
    pub fn code(self) -> u8 {
        match self {
            InputPort::One => 0x00,
            InputPort::Two => 0x01,
            InputPort::Three => 0x02,
            InputPort::Four => 0x03,
        }
    }

    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(InputPort::One),
            0x01 => Some(InputPort::Two),
            0x02 => Some(InputPort::Three),
            0x03 => Some(InputPort::Four),
            _ => None,
        }
    }
}

impl FromStr for InputPort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(InputPort::One),
            "2" => Ok(InputPort::Two),
            "3" => Ok(InputPort::Three),
            "4" => Ok(InputPort::Four),
            other => Err(format!("invalid input port '{other}' (expected 1-4)")),
        }
    }
}

impl fmt::Display for InputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code() + 1)
    }
}

/// Motor mode bit set. Modes combine, e.g. `MotorMode::ON | MotorMode::BRAKE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MotorMode(u8);

impl MotorMode {
    /// No bits set: the motor coasts.
    pub const COAST: MotorMode = MotorMode(0x00);
    pub const ON: MotorMode = MotorMode(0x01);
    pub const BRAKE: MotorMode = MotorMode(0x02);
    pub const REGULATED: MotorMode = MotorMode(0x04);

    pub const fn from_bits(bits: u8) -> Self {
        MotorMode(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: MotorMode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MotorMode {
    type Output = MotorMode;

    fn bitor(self, rhs: MotorMode) -> MotorMode {
        MotorMode(self.0 | rhs.0)
    }
}

impl fmt::Display for MotorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "COAST");
        }
        let names: Vec<&str> = [
            (MotorMode::ON, "ON"),
            (MotorMode::BRAKE, "BRAKE"),
            (MotorMode::REGULATED, "REGULATED"),
        ]
        .iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| *name)
        .collect();
        write!(f, "{}", names.join("|"))
    }
}

/// Motor regulation mode. Codes the firmware reports but this crate has
/// no name for are kept as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Regulation {
    #[default]
    Idle,
    Speed,
    Sync,
    Unknown(u8),
}

impl Regulation {
    pub fn code(self) -> u8 {
        match self {
            Regulation::Idle => 0x00,
            Regulation::Speed => 0x01,
            Regulation::Sync => 0x02,
            Regulation::Unknown(code) => code,
        }
    }

    pub fn from_u8(code: u8) -> Self {
        match code {
            0x00 => Regulation::Idle,
            0x01 => Regulation::Speed,
            0x02 => Regulation::Sync,
            other => Regulation::Unknown(other),
        }
    }
}

/// Motor run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunState {
    #[default]
    Idle,
    RampUp,
    Running,
    RampDown,
    Unknown(u8),
}

impl RunState {
    pub fn code(self) -> u8 {
        match self {
            RunState::Idle => 0x00,
            RunState::RampUp => 0x10,
            RunState::Running => 0x20,
            RunState::RampDown => 0x40,
            RunState::Unknown(code) => code,
        }
    }

    pub fn from_u8(code: u8) -> Self {
        match code {
            0x00 => RunState::Idle,
            0x10 => RunState::RampUp,
            0x20 => RunState::Running,
            0x40 => RunState::RampDown,
            other => RunState::Unknown(other),
        }
    }
}

/// Sensor type attached to an input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorType {
    NoSensor,
    Switch,
    Temperature,
    Reflection,
    Angle,
    LightActive,
    LightInactive,
    SoundDb,
    SoundDba,
    Custom,
    LowSpeed,
    LowSpeed9V,
    /// Reserved by the firmware, never configured by programs.
    Nost,
    /// NXT 2.0 color sensor in full color mode.
    ColorFull,
    ColorRed,
    ColorGreen,
    ColorBlue,
    /// Color sensor with its lamp off.
    ColorNone,
    Unknown(u8),
}

impl SensorType {
    pub fn code(self) -> u8 {
        match self {
            SensorType::NoSensor => 0x00,
            SensorType::Switch => 0x01,
            SensorType::Temperature => 0x02,
            SensorType::Reflection => 0x03,
            SensorType::Angle => 0x04,
            SensorType::LightActive => 0x05,
            SensorType::LightInactive => 0x06,
            SensorType::SoundDb => 0x07,
            SensorType::SoundDba => 0x08,
            SensorType::Custom => 0x09,
            SensorType::LowSpeed => 0x0A,
            SensorType::LowSpeed9V => 0x0B,
            SensorType::Nost => 0x0C,
            SensorType::ColorFull => 0x0D,
            SensorType::ColorRed => 0x0E,
            SensorType::ColorGreen => 0x0F,
            SensorType::ColorBlue => 0x10,
            SensorType::ColorNone => 0x11,
            SensorType::Unknown(code) => code,
        }
    }

    pub fn from_u8(code: u8) -> Self {
        match code {
            0x00 => SensorType::NoSensor,
            0x01 => SensorType::Switch,
            0x02 => SensorType::Temperature,
            0x03 => SensorType::Reflection,
            0x04 => SensorType::Angle,
            0x05 => SensorType::LightActive,
            0x06 => SensorType::LightInactive,
            0x07 => SensorType::SoundDb,
            0x08 => SensorType::SoundDba,
            0x09 => SensorType::Custom,
            0x0A => SensorType::LowSpeed,
            0x0B => SensorType::LowSpeed9V,
            0x0C => SensorType::Nost,
            0x0D => SensorType::ColorFull,
            0x0E => SensorType::ColorRed,
            0x0F => SensorType::ColorGreen,
            0x10 => SensorType::ColorBlue,
            0x11 => SensorType::ColorNone,
            other => SensorType::Unknown(other),
        }
    }
}

impl FromStr for SensorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(SensorType::NoSensor),
            "switch" | "touch" => Ok(SensorType::Switch),
            "temperature" => Ok(SensorType::Temperature),
            "reflection" => Ok(SensorType::Reflection),
            "angle" => Ok(SensorType::Angle),
            "light-active" => Ok(SensorType::LightActive),
            "light-inactive" => Ok(SensorType::LightInactive),
            "sound-db" => Ok(SensorType::SoundDb),
            "sound-dba" => Ok(SensorType::SoundDba),
            "custom" => Ok(SensorType::Custom),
            "lowspeed" => Ok(SensorType::LowSpeed),
            "lowspeed-9v" => Ok(SensorType::LowSpeed9V),
            "color-full" => Ok(SensorType::ColorFull),
            "color-red" => Ok(SensorType::ColorRed),
            "color-green" => Ok(SensorType::ColorGreen),
            "color-blue" => Ok(SensorType::ColorBlue),
            "color-none" => Ok(SensorType::ColorNone),
            other => Err(format!("unknown sensor type '{other}'")),
        }
    }
}

/// Sensor value interpretation. The low five bits of the wire byte carry
/// the slope for transition/period counting and are dropped when decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SensorMode {
    #[default]
    Raw,
    Boolean,
    TransitionCount,
    PeriodCount,
    PercentFullScale,
    Celsius,
    Fahrenheit,
    AngleSteps,
}

impl SensorMode {
    pub const MODE_MASK: u8 = 0xE0;
    pub const SLOPE_MASK: u8 = 0x1F;

    pub fn code(self) -> u8 {
        match self {
            SensorMode::Raw => 0x00,
            SensorMode::Boolean => 0x20,
            SensorMode::TransitionCount => 0x40,
            SensorMode::PeriodCount => 0x60,
            SensorMode::PercentFullScale => 0x80,
            SensorMode::Celsius => 0xA0,
            SensorMode::Fahrenheit => 0xC0,
            SensorMode::AngleSteps => 0xE0,
        }
    }

    pub fn from_u8(code: u8) -> Self {
        match code & Self::MODE_MASK {
            0x20 => SensorMode::Boolean,
            0x40 => SensorMode::TransitionCount,
            0x60 => SensorMode::PeriodCount,
            0x80 => SensorMode::PercentFullScale,
            0xA0 => SensorMode::Celsius,
            0xC0 => SensorMode::Fahrenheit,
            0xE0 => SensorMode::AngleSteps,
            _ => SensorMode::Raw,
        }
    }
}

impl FromStr for SensorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(SensorMode::Raw),
            "boolean" | "bool" => Ok(SensorMode::Boolean),
            "transition-count" => Ok(SensorMode::TransitionCount),
            "period-count" => Ok(SensorMode::PeriodCount),
            "percent" | "pct" => Ok(SensorMode::PercentFullScale),
            "celsius" => Ok(SensorMode::Celsius),
            "fahrenheit" => Ok(SensorMode::Fahrenheit),
            "angle-steps" => Ok(SensorMode::AngleSteps),
            other => Err(format!("unknown sensor mode '{other}'")),
        }
    }
}

/// Arguments for `SetOutputState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOutputState {
    pub port: OutputPort,
    /// -100..=100
    pub power: i8,
    pub mode: MotorMode,
    pub regulation: Regulation,
    /// -100..=100, used with `Regulation::Sync`.
    pub turn_ratio: i8,
    pub run_state: RunState,
    /// Degrees to run for; 0 runs forever.
    pub tacho_limit: u32,
}

impl SetOutputState {
    /// Speed-regulated run at `power` with no tacho limit.
    pub fn run(port: OutputPort, power: i8) -> Self {
        Self {
            port,
            power,
            mode: MotorMode::ON | MotorMode::REGULATED,
            regulation: Regulation::Speed,
            turn_ratio: 0,
            run_state: RunState::Running,
            tacho_limit: 0,
        }
    }

    /// Actively hold the motor in place.
    pub fn brake(port: OutputPort) -> Self {
        Self {
            port,
            power: 0,
            mode: MotorMode::ON | MotorMode::BRAKE | MotorMode::REGULATED,
            regulation: Regulation::Speed,
            turn_ratio: 0,
            run_state: RunState::Running,
            tacho_limit: 0,
        }
    }

    /// Cut power and let the motor spin down freely.
    pub fn coast(port: OutputPort) -> Self {
        Self {
            port,
            power: 0,
            mode: MotorMode::COAST,
            regulation: Regulation::Idle,
            turn_ratio: 0,
            run_state: RunState::Idle,
            tacho_limit: 0,
        }
    }
}

/// Motor telemetry returned by `GetOutputState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputState {
    pub port: OutputPort,
    pub power: i8,
    pub mode: MotorMode,
    pub regulation: Regulation,
    pub turn_ratio: i8,
    pub run_state: RunState,
    pub tacho_limit: u32,
    /// Count since the last motor-control reset.
    pub tacho_count: i32,
    /// Count relative to the last reference position.
    pub block_tacho_count: i32,
    /// Count since the last program-relative reset.
    pub rotation_count: i32,
}

/// Sensor reading returned by `GetInputValues`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputValues {
    pub port: InputPort,
    /// The reading is fresh for the current type/mode.
    pub valid: bool,
    pub calibrated: bool,
    pub sensor_type: SensorType,
    pub sensor_mode: SensorMode,
    pub raw_value: u16,
    pub normalized_value: u16,
    pub scaled_value: i16,
    pub calibrated_value: i16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_codes() {
        assert_eq!(OutputPort::All.code(), 0xFF);
        assert_eq!(OutputPort::from_u8(0x02), Some(OutputPort::C));
        assert_eq!(OutputPort::from_u8(0x03), None);
        assert_eq!(InputPort::Four.code(), 0x03);
        assert_eq!(InputPort::from_u8(0x04), None);
    }

    #[test]
    fn test_port_parsing() {
        assert_eq!("b".parse::<OutputPort>(), Ok(OutputPort::B));
        assert_eq!("ALL".parse::<OutputPort>(), Ok(OutputPort::All));
        assert_eq!("3".parse::<InputPort>(), Ok(InputPort::Three));
        assert!("5".parse::<InputPort>().is_err());
    }

    #[test]
    fn test_motor_mode_bits() {
        let mode = MotorMode::ON | MotorMode::BRAKE | MotorMode::REGULATED;
        assert_eq!(mode.bits(), 0x07);
        assert!(mode.contains(MotorMode::BRAKE));
        assert_eq!(mode.to_string(), "ON|BRAKE|REGULATED");
        assert_eq!(MotorMode::COAST.to_string(), "COAST");
    }

    #[test]
    fn test_sensor_mode_drops_slope() {
        assert_eq!(SensorMode::from_u8(0x45), SensorMode::TransitionCount);
        assert_eq!(SensorMode::from_u8(0x1F), SensorMode::Raw);
        assert_eq!(SensorMode::Celsius.code(), 0xA0);
    }

    #[test]
    fn test_run_state_codes() {
        assert_eq!(RunState::from_u8(0x20), RunState::Running);
        assert_eq!(RunState::from_u8(0x30), RunState::Unknown(0x30));
        assert_eq!(RunState::Unknown(0x30).code(), 0x30);
        assert_eq!(Regulation::from_u8(0x02), Regulation::Sync);
        assert_eq!(Regulation::from_u8(0x07).code(), 0x07);
    }

    #[test]
    fn test_sensor_type_codes_are_total() {
        assert_eq!(SensorType::from_u8(0x0C), SensorType::Nost);
        assert_eq!(SensorType::from_u8(0x0D), SensorType::ColorFull);
        assert_eq!(SensorType::from_u8(0x11), SensorType::ColorNone);
        assert_eq!(SensorType::from_u8(0x42), SensorType::Unknown(0x42));
        for code in 0..=u8::MAX {
            assert_eq!(SensorType::from_u8(code).code(), code);
        }
        assert_eq!("color-red".parse::<SensorType>(), Ok(SensorType::ColorRed));
    }

    #[test]
    fn test_set_output_presets() {
        let run = SetOutputState::run(OutputPort::A, 75);
        assert_eq!(run.mode.bits(), 0x05);
        assert_eq!(run.run_state, RunState::Running);

        let coast = SetOutputState::coast(OutputPort::B);
        assert_eq!(coast.mode, MotorMode::COAST);
        assert_eq!(coast.run_state, RunState::Idle);
    }
}
