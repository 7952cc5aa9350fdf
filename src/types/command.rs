//! Control requests expressed as partial attribute changes.

use super::{Attr, Attributes, DeviceKey, DeviceType, FanMode, HvacMode, Value, VentPreset};

/// A requested change to one device.
///
/// `changes` is partial: untouched attributes are filled in from the
/// device's shadow state when the frame is built.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub key: DeviceKey,
    pub changes: Attributes,
}

impl Command {
    /// Command with no changes, re-sending the current state.
    pub fn refresh(key: DeviceKey) -> Self {
        Self { key, changes: Attributes::new() }
    }

    pub fn with(mut self, attr: Attr, value: impl Into<Value>) -> Self {
        self.changes.insert(attr, value.into());
        self
    }

    pub fn turn_on(key: DeviceKey) -> Self {
        Self::refresh(key).with(Attr::Power, true)
    }

    pub fn turn_off(key: DeviceKey) -> Self {
        Self::refresh(key).with(Attr::Power, false)
    }

    pub fn set_hvac_mode(key: DeviceKey, mode: HvacMode) -> Self {
        Self::refresh(key).with(Attr::HvacMode, mode)
    }

    pub fn set_fan_mode(key: DeviceKey, mode: FanMode) -> Self {
        Self::refresh(key).with(Attr::FanMode, mode)
    }

    pub fn set_target_temp(key: DeviceKey, celsius: u8) -> Self {
        Self::refresh(key).with(Attr::TargetTemp, celsius)
    }

    pub fn set_away(key: DeviceKey, away: bool) -> Self {
        Self::refresh(key).with(Attr::Away, away)
    }

    pub fn set_preset(key: DeviceKey, preset: VentPreset) -> Self {
        Self::refresh(key).with(Attr::Preset, preset)
    }

    /// Sets the raw ventilation speed level; zero switches the fan off.
    pub fn set_speed(key: DeviceKey, level: u8) -> Self {
        Self::refresh(key).with(Attr::Speed, level)
    }

    pub fn close_valve(room: u8) -> Self {
        Self::turn_off(DeviceKey::new(DeviceType::GasValve, room))
    }

    pub fn call_elevator(room: u8) -> Self {
        Self::turn_on(DeviceKey::new(DeviceType::Elevator, room))
    }
}
