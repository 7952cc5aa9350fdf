//! Device addressing: families, sub-types, platforms and keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Device family as addressed on the bus.
///
/// `LightCutoff` shares the light device code and is told apart by the
/// reserved room `0xFF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Light,
    LightCutoff,
    Outlet,
    Thermostat,
    AirConditioner,
    Ventilation,
    GasValve,
    Elevator,
    Motion,
    AirQuality,
}

/// Room byte used by the light cutoff (master) switch.
pub const LIGHT_CUTOFF_ROOM: u8 = 0xFF;

impl DeviceType {
    /// All families, in bus-code order.
    pub const ALL: [DeviceType; 10] = [
        DeviceType::Light,
        DeviceType::LightCutoff,
        DeviceType::Outlet,
        DeviceType::Thermostat,
        DeviceType::AirConditioner,
        DeviceType::Ventilation,
        DeviceType::GasValve,
        DeviceType::Elevator,
        DeviceType::Motion,
        DeviceType::AirQuality,
    ];

    /// Device code carried in the address bytes.
    pub fn code(self) -> u8 {
        match self {
            DeviceType::Light | DeviceType::LightCutoff => 0x0E,
            DeviceType::Outlet => 0x3B,
            DeviceType::Thermostat => 0x36,
            DeviceType::AirConditioner => 0x39,
            DeviceType::Ventilation => 0x48,
            DeviceType::GasValve => 0x2C,
            DeviceType::Elevator => 0x44,
            DeviceType::Motion => 0x60,
            DeviceType::AirQuality => 0x98,
        }
    }

    /// Resolves a device code and room byte into a family.
    pub fn from_code(code: u8, room: u8) -> Option<Self> {
        let device = match code {
            0x0E if room == LIGHT_CUTOFF_ROOM => DeviceType::LightCutoff,
            0x0E => DeviceType::Light,
            0x3B => DeviceType::Outlet,
            0x36 => DeviceType::Thermostat,
            0x39 => DeviceType::AirConditioner,
            0x48 => DeviceType::Ventilation,
            0x2C => DeviceType::GasValve,
            0x44 => DeviceType::Elevator,
            0x60 => DeviceType::Motion,
            0x98 => DeviceType::AirQuality,
            _ => return None,
        };
        Some(device)
    }

    /// Families whose panels chirp audibly when queried.
    ///
    /// These are never probed by discovery or the heartbeat.
    pub fn beeps_on_query(self) -> bool {
        matches!(self, DeviceType::Thermostat | DeviceType::AirConditioner)
    }

    /// Families made of eight on/off slots sharing one frame.
    pub fn is_switch_bank(self) -> bool {
        matches!(self, DeviceType::Light | DeviceType::Outlet)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Light => "light",
            DeviceType::LightCutoff => "light_cutoff",
            DeviceType::Outlet => "outlet",
            DeviceType::Thermostat => "thermostat",
            DeviceType::AirConditioner => "air_conditioner",
            DeviceType::Ventilation => "ventilation",
            DeviceType::GasValve => "gas_valve",
            DeviceType::Elevator => "elevator",
            DeviceType::Motion => "motion",
            DeviceType::AirQuality => "air_quality",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secondary entity derived from one device's frame.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SubType {
    #[default]
    None,
    Direction,
    Floor,
    ErrorCode,
    HeatTemp,
    HotTemp,
    Co2,
    Pm10,
    Pm25,
    Voc,
    Temperature,
    Humidity,
}

impl SubType {
    pub fn as_str(self) -> &'static str {
        match self {
            SubType::None => "none",
            SubType::Direction => "direction",
            SubType::Floor => "floor",
            SubType::ErrorCode => "error_code",
            SubType::HeatTemp => "heat_temp",
            SubType::HotTemp => "hot_temp",
            SubType::Co2 => "co2",
            SubType::Pm10 => "pm10",
            SubType::Pm25 => "pm25",
            SubType::Voc => "voc",
            SubType::Temperature => "temperature",
            SubType::Humidity => "humidity",
        }
    }
}

/// Host entity platform a key is surfaced as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Light,
    Switch,
    Climate,
    Fan,
    Sensor,
    BinarySensor,
}

/// Stable address of one observable or controllable device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceKey {
    pub device_type: DeviceType,
    pub room: u8,
    /// Slot within a switch bank; zero for everything else.
    pub index: u8,
    pub sub_type: SubType,
}

impl DeviceKey {
    pub const fn new(device_type: DeviceType, room: u8) -> Self {
        Self { device_type, room, index: 0, sub_type: SubType::None }
    }

    pub const fn with_index(mut self, index: u8) -> Self {
        self.index = index;
        self
    }

    pub const fn with_sub(mut self, sub_type: SubType) -> Self {
        self.sub_type = sub_type;
        self
    }

    /// The light cutoff switch key.
    pub const fn light_cutoff() -> Self {
        Self::new(DeviceType::LightCutoff, LIGHT_CUTOFF_ROOM)
    }

    /// Key of the primary entity this key hangs off.
    pub const fn primary(self) -> Self {
        self.with_sub(SubType::None)
    }

    /// Platform this key is surfaced as.
    pub fn platform(&self) -> Platform {
        match (self.device_type, self.sub_type) {
            (DeviceType::Light | DeviceType::LightCutoff, _) => Platform::Light,
            (DeviceType::Outlet | DeviceType::GasValve, _) => Platform::Switch,
            (_, SubType::ErrorCode) => Platform::BinarySensor,
            (DeviceType::Thermostat | DeviceType::AirConditioner, SubType::None) => {
                Platform::Climate
            }
            (DeviceType::Ventilation, SubType::None) => Platform::Fan,
            (DeviceType::Elevator, SubType::None) => Platform::Switch,
            (DeviceType::Motion, _) => Platform::BinarySensor,
            _ => Platform::Sensor,
        }
    }

    /// Identifier stable across restarts, e.g. `light_1_2_none`.
    pub fn unique_id(&self) -> String {
        format!("{}_{}_{}_{}", self.device_type, self.room, self.index, self.sub_type.as_str())
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} room {} #{}", self.device_type, self.room, self.index)?;
        if self.sub_type != SubType::None {
            write!(f, " ({})", self.sub_type.as_str())?;
        }
        Ok(())
    }
}
