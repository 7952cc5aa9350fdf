//! State-preserving command generation.
//!
//! A [`Command`] names only the attributes the caller wants changed, but
//! the bus expects every payload byte of a family to be meaningful. The
//! builder snapshots the device's shadow state once, overlays the requested
//! changes, and fills anything still unknown from per-family safe defaults:
//!
//! | family          | defaults                                 |
//! |-----------------|------------------------------------------|
//! | light / outlet  | sibling slots off                        |
//! | thermostat      | heating, not away, 22 °C                 |
//! | air conditioner | cool, fan low, 24 °C                     |
//! | ventilation     | on, ventilation preset, lowest speed     |
//!
//! A temperature change therefore never resets fan or mode, and a speed
//! change never resets the preset.

use tracing::debug;

use crate::protocol::{Control, Frame, PacketCodec};
use crate::registry::DeviceStateRegistry;
use crate::types::{
    Attr, Attributes, Command, DeviceKey, DeviceType, FanMode, HvacMode, SPEED_LEVELS, SubType,
    Value, VentPreset,
};
use crate::{Result, WallpadError};

/// Lowest settable climate target.
pub const MIN_TARGET_TEMP: u8 = 5;
/// Highest settable climate target.
pub const MAX_TARGET_TEMP: u8 = 40;

const THERMOSTAT_DEFAULT_TARGET: u8 = 22;
const AIRCON_DEFAULT_TARGET: u8 = 24;

/// Everything the dispatcher needs to send a command and recognise its ACK.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPlan {
    pub key: DeviceKey,
    pub control: Control,
    pub frame: Frame,
    /// Attribute values a confirming event for `key` must carry.
    pub expect: Attributes,
    /// Slow actuators (gas valve, set-point) get a longer ACK window.
    pub slow: bool,
}

/// Builds full frames from partial commands against a registry.
pub struct CommandBuilder<'a> {
    registry: &'a DeviceStateRegistry,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(registry: &'a DeviceStateRegistry) -> Self {
        Self { registry }
    }

    /// Encodes `command` into a frame.
    pub fn build(&self, command: &Command) -> Result<Frame> {
        self.plan(command).map(|plan| plan.frame)
    }

    /// Resolves `command` into a full control, its frame and the expected ACK.
    pub fn plan(&self, command: &Command) -> Result<CommandPlan> {
        let key = command.key;
        if key.sub_type != SubType::None {
            return Err(WallpadError::unsupported(
                key.device_type,
                format!("{} sensor is read-only", key.sub_type.as_str()),
            ));
        }

        let (control, expect, slow) = match key.device_type {
            DeviceType::Light | DeviceType::Outlet => self.switch_bank(command)?,
            DeviceType::Thermostat => self.thermostat(command)?,
            DeviceType::AirConditioner => self.air_conditioner(command)?,
            DeviceType::Ventilation => self.ventilation(command)?,
            DeviceType::GasValve => gas_valve(command)?,
            DeviceType::Elevator => elevator(command)?,
            DeviceType::LightCutoff | DeviceType::Motion | DeviceType::AirQuality => {
                return Err(WallpadError::unsupported(key.device_type, "device is read-only"));
            }
        };

        let frame = PacketCodec::encode(&control);
        debug!(%key, ?control, frame = %frame, "Built command frame");
        Ok(CommandPlan { key, control, frame, expect, slow })
    }

    fn shadow(&self, key: &DeviceKey) -> Attributes {
        self.registry.get(key).map(|state| state.attrs).unwrap_or_default()
    }

    fn switch_bank(&self, command: &Command) -> Result<(Control, Attributes, bool)> {
        let key = command.key;
        only_attrs(command, &[Attr::Power])?;
        let slot = usize::from(key.index);
        if slot >= 8 {
            return Err(WallpadError::invalid_value("index", format!("slot {slot} out of 0..8")));
        }

        let keys: Vec<_> = (0..8u8).map(|i| key.with_index(i)).collect();
        let mut slots = [false; 8];
        for (on, state) in slots.iter_mut().zip(self.registry.snapshot_many(&keys)) {
            *on = state.and_then(|s| s.power()).unwrap_or(false);
        }
        if let Some(power) = get_bool(&command.changes, Attr::Power)? {
            slots[slot] = power;
        }

        let mut expect = Attributes::new();
        expect.insert(Attr::Power, Value::Bool(slots[slot]));
        let control = Control::SwitchBank { device: key.device_type, room: key.room, slots };
        Ok((control, expect, false))
    }

    fn thermostat(&self, command: &Command) -> Result<(Control, Attributes, bool)> {
        only_attrs(command, &[Attr::Power, Attr::HvacMode, Attr::Away, Attr::TargetTemp])?;
        let mut delta = command.changes.clone();

        if let Some(power) = get_bool(&delta, Attr::Power)? {
            delta.remove(&Attr::Power);
            let mode = if power { HvacMode::Heat } else { HvacMode::Off };
            delta.insert(Attr::HvacMode, Value::Hvac(mode));
        }
        if let Some(mode) = get_hvac(&delta)?
            && !matches!(mode, HvacMode::Heat | HvacMode::Off)
        {
            let details = format!("{mode:?} on a thermostat");
            return Err(WallpadError::invalid_value("hvac_mode", details));
        }
        // Away and set-point changes only take effect while heating.
        if delta.contains_key(&Attr::Away) || delta.contains_key(&Attr::TargetTemp) {
            delta.insert(Attr::HvacMode, Value::Hvac(HvacMode::Heat));
        }

        let shadow = self.shadow(&command.key);
        let mode = get_hvac(&delta)?.or(get_hvac(&shadow)?).unwrap_or(HvacMode::Heat);
        let away =
            get_bool(&delta, Attr::Away)?.or(get_bool(&shadow, Attr::Away)?).unwrap_or(false);
        let target = match get_target(&delta)? {
            Some(target) => target,
            None => get_target(&shadow).ok().flatten().unwrap_or(THERMOSTAT_DEFAULT_TARGET),
        };

        let slow = delta.contains_key(&Attr::TargetTemp);
        let control = Control::Thermostat {
            room: command.key.room,
            heating: mode == HvacMode::Heat,
            away,
            target,
        };
        Ok((control, delta, slow))
    }

    fn air_conditioner(&self, command: &Command) -> Result<(Control, Attributes, bool)> {
        only_attrs(command, &[Attr::Power, Attr::HvacMode, Attr::FanMode, Attr::TargetTemp])?;
        let mut delta = command.changes.clone();
        let shadow = self.shadow(&command.key);
        let current = get_hvac(&shadow)?;
        // Last non-off mode, from the live mode or the byte an off report keeps.
        let resume = match current {
            Some(mode) if mode != HvacMode::Off => Some(mode),
            _ => get_typed(&shadow, Attr::ResumeMode, Value::as_hvac)?
                .filter(|mode| mode.ac_code().is_some()),
        };

        if let Some(power) = get_bool(&delta, Attr::Power)? {
            delta.remove(&Attr::Power);
            let mode = if power { resume.unwrap_or(HvacMode::Cool) } else { HvacMode::Off };
            delta.insert(Attr::HvacMode, Value::Hvac(mode));
        }
        if let Some(HvacMode::Heat) = get_hvac(&delta)? {
            return Err(WallpadError::invalid_value("hvac_mode", "air conditioner cannot heat"));
        }
        // Adjusting fan or set-point switches an idle unit on.
        let adjusting =
            delta.contains_key(&Attr::FanMode) || delta.contains_key(&Attr::TargetTemp);
        let idle = current.unwrap_or(HvacMode::Off) == HvacMode::Off;
        if adjusting && idle && !delta.contains_key(&Attr::HvacMode) {
            delta.insert(Attr::HvacMode, Value::Hvac(HvacMode::Cool));
        }

        let mode = get_hvac(&delta)?.or(current).unwrap_or(HvacMode::Cool);
        let power = mode != HvacMode::Off;
        let operating = if power { mode } else { resume.unwrap_or(HvacMode::Cool) };
        let fan = get_fan(&delta)?.or(get_fan(&shadow)?).unwrap_or(FanMode::Low);
        let target = match get_target(&delta)? {
            Some(target) => target,
            None => get_target(&shadow).ok().flatten().unwrap_or(AIRCON_DEFAULT_TARGET),
        };

        let slow = delta.contains_key(&Attr::TargetTemp);
        let control = Control::AirConditioner {
            room: command.key.room,
            power,
            mode: operating,
            fan,
            target,
        };
        Ok((control, delta, slow))
    }

    fn ventilation(&self, command: &Command) -> Result<(Control, Attributes, bool)> {
        only_attrs(command, &[Attr::Power, Attr::Preset, Attr::Speed])?;
        let mut delta = command.changes.clone();

        if let Some(speed) = get_int(&delta, Attr::Speed)? {
            let level = u8::try_from(speed).ok().filter(|l| *l == 0 || SPEED_LEVELS.contains(l));
            let Some(level) = level else {
                return Err(WallpadError::invalid_value(
                    "speed",
                    format!("{speed} is not one of 0, 0x40, 0x80, 0xC0"),
                ));
            };
            delta.insert(Attr::Power, Value::Bool(level != 0));
        }
        if get_preset(&delta)?.is_some() {
            delta.insert(Attr::Power, Value::Bool(true));
        }

        let shadow = self.shadow(&command.key);
        let power =
            get_bool(&delta, Attr::Power)?.or(get_bool(&shadow, Attr::Power)?).unwrap_or(true);
        let preset =
            get_preset(&delta)?.or(get_preset(&shadow)?).unwrap_or(VentPreset::Ventilation);
        let mut speed = match get_int(&delta, Attr::Speed)? {
            Some(speed) => speed as u8,
            None => get_int(&shadow, Attr::Speed)?
                .and_then(|s| u8::try_from(s).ok())
                .unwrap_or(SPEED_LEVELS[0]),
        };
        if power && speed == 0 {
            speed = SPEED_LEVELS[0];
        }

        let control = Control::Ventilation { room: command.key.room, power, preset, speed };
        Ok((control, delta, false))
    }
}

fn gas_valve(command: &Command) -> Result<(Control, Attributes, bool)> {
    only_attrs(command, &[Attr::Power])?;
    match get_bool(&command.changes, Attr::Power)? {
        Some(false) => {
            let control = Control::GasValveClose { room: command.key.room };
            Ok((control, command.changes.clone(), true))
        }
        _ => Err(WallpadError::unsupported(DeviceType::GasValve, "the valve can only be closed")),
    }
}

fn elevator(command: &Command) -> Result<(Control, Attributes, bool)> {
    only_attrs(command, &[Attr::Power])?;
    match get_bool(&command.changes, Attr::Power)? {
        Some(true) => {
            let control = Control::ElevatorCall { room: command.key.room };
            Ok((control, command.changes.clone(), false))
        }
        _ => Err(WallpadError::unsupported(DeviceType::Elevator, "it can only be called")),
    }
}

fn only_attrs(command: &Command, allowed: &[Attr]) -> Result<()> {
    match command.changes.keys().find(|attr| !allowed.contains(attr)) {
        Some(attr) => Err(WallpadError::unsupported(
            command.key.device_type,
            format!("cannot set {attr:?}"),
        )),
        None => Ok(()),
    }
}

fn mistyped(attr: Attr, value: &Value) -> WallpadError {
    WallpadError::invalid_value(format!("{attr:?}"), format!("unexpected value {value:?}"))
}

fn get_typed<T>(
    attrs: &Attributes,
    attr: Attr,
    extract: impl Fn(&Value) -> Option<T>,
) -> Result<Option<T>> {
    match attrs.get(&attr) {
        None => Ok(None),
        Some(value) => extract(value).map(Some).ok_or_else(|| mistyped(attr, value)),
    }
}

fn get_bool(attrs: &Attributes, attr: Attr) -> Result<Option<bool>> {
    get_typed(attrs, attr, Value::as_bool)
}

fn get_int(attrs: &Attributes, attr: Attr) -> Result<Option<i32>> {
    get_typed(attrs, attr, Value::as_int)
}

fn get_hvac(attrs: &Attributes) -> Result<Option<HvacMode>> {
    get_typed(attrs, Attr::HvacMode, Value::as_hvac)
}

fn get_fan(attrs: &Attributes) -> Result<Option<FanMode>> {
    get_typed(attrs, Attr::FanMode, Value::as_fan)
}

fn get_preset(attrs: &Attributes) -> Result<Option<VentPreset>> {
    get_typed(attrs, Attr::Preset, Value::as_preset)
}

/// Set-point validated against the settable range.
fn get_target(attrs: &Attributes) -> Result<Option<u8>> {
    let Some(target) = get_int(attrs, Attr::TargetTemp)? else {
        return Ok(None);
    };
    match u8::try_from(target) {
        Ok(t) if (MIN_TARGET_TEMP..=MAX_TARGET_TEMP).contains(&t) => Ok(Some(t)),
        _ => Err(WallpadError::invalid_value(
            "target_temp",
            format!("{target} outside {MIN_TARGET_TEMP}..={MAX_TARGET_TEMP}"),
        )),
    }
}
