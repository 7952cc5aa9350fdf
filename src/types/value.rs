//! Attribute names and typed values carried by events, states and commands.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attr {
    Power,
    HvacMode,
    /// Mode an air conditioner returns to when switched on. Reported in
    /// both on and off frames.
    ResumeMode,
    FanMode,
    /// Ventilation operating preset.
    Preset,
    /// Thermostat away preset.
    Away,
    TargetTemp,
    CurrentTemp,
    /// Raw ventilation speed level (`0x00`, `0x40`, `0x80`, `0xC0`).
    Speed,
    Direction,
    Floor,
    /// Numeric sensor reading.
    Reading,
    Problem,
    ErrorCode,
    Motion,
}

/// Full or partial set of attribute values.
pub type Attributes = BTreeMap<Attr, Value>;

/// Typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Hvac(HvacMode),
    Fan(FanMode),
    Preset(VentPreset),
    Direction(ElevatorDirection),
    Text(String),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_hvac(&self) -> Option<HvacMode> {
        match self {
            Value::Hvac(m) => Some(*m),
            _ => None,
        }
    }

    pub fn as_fan(&self) -> Option<FanMode> {
        match self {
            Value::Fan(m) => Some(*m),
            _ => None,
        }
    }

    pub fn as_preset(&self) -> Option<VentPreset> {
        match self {
            Value::Preset(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_direction(&self) -> Option<ElevatorDirection> {
        match self {
            Value::Direction(d) => Some(*d),
            _ => None,
        }
    }

    /// Re-reads a deserialized value as the type `attr` carries.
    ///
    /// Untagged deserialization takes the first variant that fits, so `auto`
    /// always comes back as an HVAC mode and `unknown` as a preset.
    pub fn retyped(self, attr: Attr) -> Value {
        match (attr, self) {
            (Attr::FanMode, Value::Hvac(HvacMode::Auto)) => Value::Fan(FanMode::Auto),
            (Attr::Preset, Value::Hvac(HvacMode::Auto)) => Value::Preset(VentPreset::Auto),
            (Attr::Direction, Value::Preset(VentPreset::Unknown)) => {
                Value::Direction(ElevatorDirection::Unknown)
            }
            (_, value) => value,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", if *b { "on" } else { "off" }),
            Value::Int(i) => write!(f, "{i}"),
            Value::Hvac(m) => write!(f, "{m:?}"),
            Value::Fan(m) => write!(f, "{m:?}"),
            Value::Preset(p) => write!(f, "{p:?}"),
            Value::Direction(d) => write!(f, "{d:?}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Int(i32::from(v))
    }
}

impl From<HvacMode> for Value {
    fn from(v: HvacMode) -> Self {
        Value::Hvac(v)
    }
}

impl From<FanMode> for Value {
    fn from(v: FanMode) -> Self {
        Value::Fan(v)
    }
}

impl From<VentPreset> for Value {
    fn from(v: VentPreset) -> Self {
        Value::Preset(v)
    }
}

impl From<ElevatorDirection> for Value {
    fn from(v: ElevatorDirection) -> Self {
        Value::Direction(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Climate operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacMode {
    Off,
    Heat,
    Cool,
    FanOnly,
    Dry,
    Auto,
}

impl HvacMode {
    /// Air-conditioner mode byte. `None` for modes the unit has no code for.
    pub fn ac_code(self) -> Option<u8> {
        match self {
            HvacMode::Cool => Some(0x00),
            HvacMode::FanOnly => Some(0x01),
            HvacMode::Dry => Some(0x02),
            HvacMode::Auto => Some(0x03),
            HvacMode::Off | HvacMode::Heat => None,
        }
    }

    pub fn from_ac_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(HvacMode::Cool),
            0x01 => Some(HvacMode::FanOnly),
            0x02 => Some(HvacMode::Dry),
            0x03 => Some(HvacMode::Auto),
            _ => None,
        }
    }
}

/// Air-conditioner fan mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanMode {
    Low,
    Medium,
    High,
    Auto,
}

impl FanMode {
    pub fn code(self) -> u8 {
        match self {
            FanMode::Low => 0x01,
            FanMode::Medium => 0x02,
            FanMode::High => 0x03,
            FanMode::Auto => 0x04,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(FanMode::Low),
            0x02 => Some(FanMode::Medium),
            0x03 => Some(FanMode::High),
            0x04 => Some(FanMode::Auto),
            _ => None,
        }
    }
}

/// Ventilation preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VentPreset {
    Unknown,
    Ventilation,
    Auto,
    Bypass,
    Sleep,
    AirPurification,
}

impl VentPreset {
    pub fn code(self) -> u8 {
        match self {
            VentPreset::Unknown => 0x00,
            VentPreset::Ventilation => 0x01,
            VentPreset::Auto => 0x02,
            VentPreset::Bypass => 0x03,
            VentPreset::Sleep => 0x05,
            VentPreset::AirPurification => 0x08,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => VentPreset::Ventilation,
            0x02 => VentPreset::Auto,
            0x03 => VentPreset::Bypass,
            0x05 => VentPreset::Sleep,
            0x08 => VentPreset::AirPurification,
            _ => VentPreset::Unknown,
        }
    }
}

/// Elevator car movement as reported to the wallpad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElevatorDirection {
    Idle,
    Downward,
    Upward,
    Arrival,
    Called,
    Unknown,
}

/// Ventilation speed levels, lowest first.
pub const SPEED_LEVELS: [u8; 3] = [0x40, 0x80, 0xC0];

/// Percentage for a raw ventilation speed level. Unknown levels round down.
pub fn speed_percentage(level: u8) -> u8 {
    let steps = SPEED_LEVELS.iter().filter(|&&l| l <= level).count();
    (steps * 100 / SPEED_LEVELS.len()) as u8
}

/// Raw speed level for a percentage, rounding up to the next level.
pub fn speed_for_percentage(percentage: u8) -> u8 {
    if percentage == 0 {
        return 0;
    }
    let pct = usize::from(percentage.min(100));
    let step = (pct * SPEED_LEVELS.len()).div_ceil(100);
    SPEED_LEVELS[step.clamp(1, SPEED_LEVELS.len()) - 1]
}
