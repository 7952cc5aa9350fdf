//! Per-family decode and encode rules.
//!
//! Decoding turns one frame into zero or more [`DeviceEvent`]s, one per
//! entity the frame describes (a thermostat frame also carries two
//! temperature sensors and an error flag). Encoding takes a fully populated
//! [`Control`] and lays out every payload byte the family expects.

use tracing::{debug, trace};

use super::{Frame, PACKET_TYPE_ACK, PAYLOAD_LEN, WALLPAD, cmd};
use crate::types::{
    Attr, DeviceEvent, DeviceKey, DeviceType, ElevatorDirection, FanMode, HvacMode, SubType,
    VentPreset,
};

/// Fully populated control payload for one device family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// All eight slots of a light or outlet bank.
    SwitchBank { device: DeviceType, room: u8, slots: [bool; 8] },
    Thermostat { room: u8, heating: bool, away: bool, target: u8 },
    /// `mode` is the operating mode and is kept while `power` is off.
    AirConditioner { room: u8, power: bool, mode: HvacMode, fan: FanMode, target: u8 },
    Ventilation { room: u8, power: bool, preset: VentPreset, speed: u8 },
    GasValveClose { room: u8 },
    ElevatorCall { room: u8 },
    /// Status query, used by discovery and the heartbeat.
    Query { device: DeviceType, room: u8 },
}

/// Stateless frame codec.
pub struct PacketCodec;

impl PacketCodec {
    /// Decodes a frame into device events.
    ///
    /// Returns `None` for frames that carry nothing of interest: chatter
    /// between two devices, unknown device codes, and command bytes a family
    /// does not report state with.
    pub fn decode(frame: &Frame) -> Option<Vec<DeviceEvent>> {
        let Some([code, room]) = frame.peer() else {
            trace!(frame = %frame, "Ignoring inter-device frame");
            return None;
        };
        let Some(device) = DeviceType::from_code(code, room) else {
            trace!(code, room, "Ignoring unknown device code");
            return None;
        };

        let events = match device {
            DeviceType::Light | DeviceType::Outlet => decode_switch_bank(frame, device, room),
            DeviceType::LightCutoff => decode_cutoff(frame),
            DeviceType::Thermostat => decode_thermostat(frame, room),
            DeviceType::AirConditioner => decode_air_conditioner(frame, room),
            DeviceType::Ventilation => decode_ventilation(frame, room),
            DeviceType::GasValve => decode_gas_valve(frame, room),
            DeviceType::Elevator => decode_elevator(frame, room),
            DeviceType::Motion => decode_motion(frame, room),
            DeviceType::AirQuality => decode_air_quality(frame, room),
        };

        if events.is_empty() {
            debug!(%device, room, command = frame.command(), "No state in frame");
            None
        } else {
            Some(events)
        }
    }

    /// Encodes a control into a frame sent by the wallpad.
    pub fn encode(control: &Control) -> Frame {
        let mut data = [0u8; PAYLOAD_LEN];
        match *control {
            Control::SwitchBank { device, room, slots } => {
                for (byte, on) in data.iter_mut().zip(slots) {
                    *byte = if on { 0xFF } else { 0x00 };
                }
                Frame::build([device.code(), room], WALLPAD, cmd::STATE, data)
            }
            Control::Thermostat { room, heating, away, target } => {
                data[0] = if heating { 0x11 } else { 0x00 };
                data[1] = if away { 0x01 } else { 0x00 };
                data[2] = target;
                Frame::build([DeviceType::Thermostat.code(), room], WALLPAD, cmd::STATE, data)
            }
            Control::AirConditioner { room, power, mode, fan, target } => {
                data[0] = if power { 0x10 } else { 0x00 };
                data[1] = mode.ac_code().unwrap_or(0x00);
                data[2] = fan.code();
                data[5] = target;
                Frame::build([DeviceType::AirConditioner.code(), room], WALLPAD, cmd::STATE, data)
            }
            Control::Ventilation { room, power, preset, speed } => {
                data[0] = if power { 0x11 } else { 0x00 };
                data[1] = preset.code();
                data[2] = speed;
                Frame::build([DeviceType::Ventilation.code(), room], WALLPAD, cmd::STATE, data)
            }
            Control::GasValveClose { room } => {
                Frame::build([DeviceType::GasValve.code(), room], WALLPAD, cmd::GAS_CLOSE, data)
            }
            Control::ElevatorCall { room } => {
                Frame::build(WALLPAD, [DeviceType::Elevator.code(), room], cmd::ELEVATOR_CALL, data)
            }
            Control::Query { device, room } => {
                Frame::build([device.code(), room], WALLPAD, cmd::QUERY, data)
            }
        }
    }
}

fn decode_switch_bank(frame: &Frame, device: DeviceType, room: u8) -> Vec<DeviceEvent> {
    if frame.command() != cmd::STATE {
        return Vec::new();
    }
    frame
        .payload()
        .iter()
        .enumerate()
        .map(|(idx, &byte)| {
            let on = byte == 0xFF;
            let key = DeviceKey::new(device, room).with_index(idx as u8);
            // Slots that have never been on are usually not wired.
            DeviceEvent::new(key, *frame).with(Attr::Power, on).registering(on)
        })
        .collect()
}

fn decode_cutoff(frame: &Frame) -> Vec<DeviceEvent> {
    let on = match frame.command() {
        cmd::CUTOFF_ON => true,
        cmd::CUTOFF_OFF => false,
        _ => return Vec::new(),
    };
    vec![DeviceEvent::new(DeviceKey::light_cutoff(), *frame).with(Attr::Power, on)]
}

fn decode_thermostat(frame: &Frame, room: u8) -> Vec<DeviceEvent> {
    if frame.command() != cmd::STATE {
        return Vec::new();
    }
    let p = frame.payload();
    let key = DeviceKey::new(DeviceType::Thermostat, room);
    let heating = p[0] >> 4 == 0x01;

    let mut climate = DeviceEvent::new(key, *frame)
        .with(Attr::HvacMode, if heating { HvacMode::Heat } else { HvacMode::Off })
        .with(Attr::Away, p[1] & 0x0F == 0x01);
    // Panels report a stale target while off; keep the last real one.
    if heating && p[2] != 0 {
        climate = climate.with(Attr::TargetTemp, p[2]);
    }
    if p[4] != 0 {
        climate = climate.with(Attr::CurrentTemp, p[4]);
    }

    let mut events = vec![climate];
    if p[3] > 0 {
        events.push(
            DeviceEvent::new(key.with_sub(SubType::HotTemp), *frame).with(Attr::Reading, p[3]),
        );
    }
    if p[5] > 0 {
        events.push(
            DeviceEvent::new(key.with_sub(SubType::HeatTemp), *frame).with(Attr::Reading, p[5]),
        );
    }
    events.push(error_event(key, frame, p[6]));
    events
}

fn decode_air_conditioner(frame: &Frame, room: u8) -> Vec<DeviceEvent> {
    if frame.command() != cmd::STATE {
        return Vec::new();
    }
    let p = frame.payload();
    let resume = HvacMode::from_ac_code(p[1]);
    let mode = match p[0] {
        0x10 => resume.unwrap_or(HvacMode::Off),
        _ => HvacMode::Off,
    };
    let fan = FanMode::from_code(p[2]).unwrap_or(FanMode::Low);

    let mut event = DeviceEvent::new(DeviceKey::new(DeviceType::AirConditioner, room), *frame)
        .with(Attr::HvacMode, mode)
        .with(Attr::FanMode, fan);
    if let Some(resume) = resume {
        event = event.with(Attr::ResumeMode, resume);
    }
    if p[4] != 0 {
        event = event.with(Attr::CurrentTemp, p[4]);
    }
    if p[5] != 0 {
        event = event.with(Attr::TargetTemp, p[5]);
    }
    vec![event]
}

fn decode_ventilation(frame: &Frame, room: u8) -> Vec<DeviceEvent> {
    if frame.command() != cmd::STATE {
        return Vec::new();
    }
    let p = frame.payload();
    let key = DeviceKey::new(DeviceType::Ventilation, room);
    let mut events = vec![
        DeviceEvent::new(key, *frame)
            .with(Attr::Power, p[0] >> 4 == 0x01)
            .with(Attr::Preset, VentPreset::from_code(p[1]))
            .with(Attr::Speed, p[2]),
    ];

    let co2 = i32::from(p[4]) * 100 + i32::from(p[5]);
    if co2 > 0 {
        events.push(DeviceEvent::new(key.with_sub(SubType::Co2), *frame).with(Attr::Reading, co2));
    }
    events.push(error_event(key, frame, p[6]));
    events
}

fn decode_gas_valve(frame: &Frame, room: u8) -> Vec<DeviceEvent> {
    let open = match frame.command() {
        cmd::GAS_OPEN => true,
        cmd::GAS_CLOSE => false,
        _ => return Vec::new(),
    };
    let key = DeviceKey::new(DeviceType::GasValve, room);
    vec![DeviceEvent::new(key, *frame).with(Attr::Power, open)]
}

fn decode_elevator(frame: &Frame, room: u8) -> Vec<DeviceEvent> {
    let p = frame.payload();
    let key = DeviceKey::new(DeviceType::Elevator, room);
    let is_reply = frame.packet_type() == PACKET_TYPE_ACK;

    let moving = match p[0] {
        0x03 => false,
        0x01 | 0x02 => true,
        _ => is_reply,
    };
    let direction = match p[0] {
        0x00 if is_reply => ElevatorDirection::Called,
        0x00 => ElevatorDirection::Idle,
        0x01 => ElevatorDirection::Downward,
        0x02 => ElevatorDirection::Upward,
        0x03 => ElevatorDirection::Arrival,
        _ => ElevatorDirection::Unknown,
    };

    let mut events = vec![
        DeviceEvent::new(key, *frame).with(Attr::Power, moving),
        DeviceEvent::new(key.with_sub(SubType::Direction), *frame).with(Attr::Direction, direction),
    ];
    // Only buildings that report floors ever send a non-zero floor byte.
    if let Some(floor) = elevator_floor(p[1], p[2]) {
        events.push(
            DeviceEvent::new(key.with_sub(SubType::Floor), *frame).with(Attr::Floor, floor),
        );
    }
    events
}

fn elevator_floor(high: u8, low: u8) -> Option<String> {
    if high == 0 {
        return None;
    }
    let floor = if low != 0 {
        [char::from(high), char::from(low)].iter().collect()
    } else if high >> 4 == 0x08 {
        format!("B{}", high & 0x0F)
    } else {
        high.to_string()
    };
    Some(floor)
}

fn decode_motion(frame: &Frame, room: u8) -> Vec<DeviceEvent> {
    let detected = match frame.command() {
        cmd::MOTION_DETECTED => true,
        cmd::STATE => false,
        _ => return Vec::new(),
    };
    let key = DeviceKey::new(DeviceType::Motion, room);
    vec![DeviceEvent::new(key, *frame).with(Attr::Motion, detected)]
}

fn decode_air_quality(frame: &Frame, room: u8) -> Vec<DeviceEvent> {
    if !matches!(frame.command(), cmd::STATE | cmd::QUERY) {
        return Vec::new();
    }
    let p = frame.payload();
    let key = DeviceKey::new(DeviceType::AirQuality, room);
    let readings = [
        (SubType::Pm10, i32::from(p[0])),
        (SubType::Pm25, i32::from(p[1])),
        (SubType::Co2, i32::from(u16::from_be_bytes([p[2], p[3]]))),
        (SubType::Voc, i32::from(u16::from_be_bytes([p[4], p[5]]))),
        (SubType::Temperature, i32::from(p[6])),
        (SubType::Humidity, i32::from(p[7])),
    ];
    readings
        .into_iter()
        .filter(|&(_, value)| value > 0)
        .map(|(sub, value)| DeviceEvent::new(key.with_sub(sub), *frame).with(Attr::Reading, value))
        .collect()
}

fn error_event(key: DeviceKey, frame: &Frame, code: u8) -> DeviceEvent {
    DeviceEvent::new(key.with_sub(SubType::ErrorCode), *frame)
        .with(Attr::Problem, code != 0)
        .with(Attr::ErrorCode, code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Platform, Value};

    fn reply(device: DeviceType, room: u8, command: u8, payload: [u8; 8]) -> Frame {
        Frame::build_with_type(0xDC, WALLPAD, [device.code(), room], command, payload)
    }

    fn single(frame: &Frame) -> DeviceEvent {
        let mut events = PacketCodec::decode(frame).expect("frame should decode");
        assert_eq!(events.len(), 1, "{events:?}");
        events.remove(0)
    }

    #[test]
    fn light_bank_registers_only_lit_slots() {
        let frame = reply(DeviceType::Light, 1, 0x00, [0xFF, 0x00, 0xFF, 0, 0, 0, 0, 0]);
        let events = PacketCodec::decode(&frame).unwrap();
        assert_eq!(events.len(), 8);
        assert_eq!(events[0].get(Attr::Power), Some(&Value::Bool(true)));
        assert!(events[0].registers);
        assert_eq!(events[1].get(Attr::Power), Some(&Value::Bool(false)));
        assert!(!events[1].registers);
        assert_eq!(events[2].key, DeviceKey::new(DeviceType::Light, 1).with_index(2));
        assert_eq!(events[2].platform, Platform::Light);
    }

    #[test]
    fn outlet_is_a_switch() {
        let frame = reply(DeviceType::Outlet, 2, 0x00, [0xFF; 8]);
        let events = PacketCodec::decode(&frame).unwrap();
        assert!(events.iter().all(|e| e.platform == Platform::Switch));
    }

    #[test]
    fn thermostat_frame_carries_sensors_and_error_flag() {
        let frame = reply(DeviceType::Thermostat, 3, 0x00, [0x11, 0x00, 23, 45, 21, 38, 0x02, 0]);
        let events = PacketCodec::decode(&frame).unwrap();
        assert_eq!(events.len(), 4);

        let climate = &events[0];
        assert_eq!(climate.get(Attr::HvacMode), Some(&Value::Hvac(HvacMode::Heat)));
        assert_eq!(climate.get(Attr::TargetTemp), Some(&Value::Int(23)));
        assert_eq!(climate.get(Attr::CurrentTemp), Some(&Value::Int(21)));
        assert_eq!(climate.get(Attr::Away), Some(&Value::Bool(false)));

        assert_eq!(events[1].key.sub_type, SubType::HotTemp);
        assert_eq!(events[2].key.sub_type, SubType::HeatTemp);
        assert_eq!(events[3].key.sub_type, SubType::ErrorCode);
        assert_eq!(events[3].get(Attr::Problem), Some(&Value::Bool(true)));
        assert_eq!(events[3].get(Attr::ErrorCode), Some(&Value::Int(2)));
    }

    #[test]
    fn thermostat_off_omits_target() {
        let frame = reply(DeviceType::Thermostat, 1, 0x00, [0x01, 0x01, 5, 0, 20, 0, 0, 0]);
        let events = PacketCodec::decode(&frame).unwrap();
        let climate = &events[0];
        assert_eq!(climate.get(Attr::HvacMode), Some(&Value::Hvac(HvacMode::Off)));
        assert_eq!(climate.get(Attr::Away), Some(&Value::Bool(true)));
        assert_eq!(climate.get(Attr::TargetTemp), None);
        // climate + error flag, no zero-valued sensors
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn air_conditioner_modes() {
        let on = [0x10, 0x02, 0x03, 0, 27, 24, 0, 0];
        let on = single(&reply(DeviceType::AirConditioner, 0, 0x00, on));
        assert_eq!(on.get(Attr::HvacMode), Some(&Value::Hvac(HvacMode::Dry)));
        assert_eq!(on.get(Attr::FanMode), Some(&Value::Fan(FanMode::High)));
        assert_eq!(on.get(Attr::TargetTemp), Some(&Value::Int(24)));
        assert_eq!(on.get(Attr::CurrentTemp), Some(&Value::Int(27)));

        let off = [0x00, 0x02, 0x09, 0, 0, 0, 0, 0];
        let off = single(&reply(DeviceType::AirConditioner, 0, 0x00, off));
        assert_eq!(off.get(Attr::HvacMode), Some(&Value::Hvac(HvacMode::Off)));
        assert_eq!(off.get(Attr::FanMode), Some(&Value::Fan(FanMode::Low)));
        assert_eq!(off.get(Attr::TargetTemp), None);
        assert_eq!(off.get(Attr::ResumeMode), Some(&Value::Hvac(HvacMode::Dry)));
    }

    #[test]
    fn ventilation_with_co2() {
        let frame = reply(DeviceType::Ventilation, 0, 0x00, [0x11, 0x05, 0x80, 0, 7, 25, 0, 0]);
        let events = PacketCodec::decode(&frame).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].get(Attr::Power), Some(&Value::Bool(true)));
        assert_eq!(events[0].get(Attr::Preset), Some(&Value::Preset(VentPreset::Sleep)));
        assert_eq!(events[0].get(Attr::Speed), Some(&Value::Int(0x80)));
        assert_eq!(events[1].get(Attr::Reading), Some(&Value::Int(725)));
        assert_eq!(events[2].get(Attr::Problem), Some(&Value::Bool(false)));
    }

    #[test]
    fn gas_valve_and_motion() {
        let open = single(&reply(DeviceType::GasValve, 0, 0x01, [0; 8]));
        assert_eq!(open.get(Attr::Power), Some(&Value::Bool(true)));
        let closed = single(&reply(DeviceType::GasValve, 0, 0x02, [0; 8]));
        assert_eq!(closed.get(Attr::Power), Some(&Value::Bool(false)));
        assert!(PacketCodec::decode(&reply(DeviceType::GasValve, 0, 0x3A, [0; 8])).is_none());

        let motion = single(&reply(DeviceType::Motion, 0, 0x04, [0; 8]));
        assert_eq!(motion.get(Attr::Motion), Some(&Value::Bool(true)));
        assert_eq!(motion.platform, Platform::BinarySensor);
    }

    #[test]
    fn elevator_floors_and_direction() {
        let called = PacketCodec::decode(&reply(DeviceType::Elevator, 1, 0x01, [0; 8])).unwrap();
        assert_eq!(called.len(), 2, "no floor until one is reported");
        assert_eq!(called[0].get(Attr::Power), Some(&Value::Bool(true)));
        assert_eq!(called[1].get(Attr::Direction), Some(&ElevatorDirection::Called.into()));

        let basement = [0x01, 0x82, 0, 0, 0, 0, 0, 0];
        let basement =
            PacketCodec::decode(&reply(DeviceType::Elevator, 1, 0x00, basement)).unwrap();
        assert_eq!(basement[1].get(Attr::Direction), Some(&ElevatorDirection::Downward.into()));
        assert_eq!(basement[2].get(Attr::Floor), Some(&Value::Text("B2".into())));

        let ascii = [0x03, b'1', b'2', 0, 0, 0, 0, 0];
        let ascii = PacketCodec::decode(&reply(DeviceType::Elevator, 1, 0x00, ascii)).unwrap();
        assert_eq!(ascii[0].get(Attr::Power), Some(&Value::Bool(false)));
        assert_eq!(ascii[2].get(Attr::Floor), Some(&Value::Text("12".into())));

        assert_eq!(elevator_floor(7, 0).as_deref(), Some("7"));
    }

    #[test]
    fn air_quality_skips_zero_readings() {
        let frame = reply(DeviceType::AirQuality, 0, 0x3A, [12, 8, 0x01, 0xF4, 0, 0, 24, 0]);
        let events = PacketCodec::decode(&frame).unwrap();
        let subs: Vec<_> = events.iter().map(|e| e.key.sub_type).collect();
        assert_eq!(subs, vec![SubType::Pm10, SubType::Pm25, SubType::Co2, SubType::Temperature]);
        assert_eq!(events[2].get(Attr::Reading), Some(&Value::Int(500)));
    }

    #[test]
    fn cutoff_switch() {
        let frame = Frame::build_with_type(0xDC, WALLPAD, [0x0E, 0xFF], 0x65, [0; 8]);
        let event = single(&frame);
        assert_eq!(event.key, DeviceKey::light_cutoff());
        assert_eq!(event.get(Attr::Power), Some(&Value::Bool(true)));
    }

    #[test]
    fn unrelated_frames_are_dropped() {
        let chatter = Frame::build([0x0E, 0x01], [0x36, 0x01], 0x00, [0xFF; 8]);
        assert!(PacketCodec::decode(&chatter).is_none());
        let unknown = Frame::build_with_type(0xDC, WALLPAD, [0x77, 0x00], 0x00, [0xFF; 8]);
        assert!(PacketCodec::decode(&unknown).is_none());
    }

    #[test]
    fn encoded_layouts() {
        let control = Control::Thermostat { room: 2, heating: true, away: false, target: 24 };
        let thermo = PacketCodec::encode(&control);
        assert_eq!(thermo.dest(), [0x36, 0x02]);
        assert_eq!(thermo.src(), WALLPAD);
        assert_eq!(thermo.type_byte(), 0xBC);
        assert_eq!(thermo.payload(), [0x11, 0x00, 24, 0, 0, 0, 0, 0]);

        let ac = PacketCodec::encode(&Control::AirConditioner {
            room: 0,
            power: true,
            mode: HvacMode::Cool,
            fan: FanMode::High,
            target: 26,
        });
        assert_eq!(ac.payload(), [0x10, 0x00, 0x03, 0, 0, 26, 0, 0]);

        let ac_off = PacketCodec::encode(&Control::AirConditioner {
            room: 0,
            power: false,
            mode: HvacMode::Dry,
            fan: FanMode::Low,
            target: 26,
        });
        assert_eq!(ac_off.payload(), [0x00, 0x02, 0x01, 0, 0, 26, 0, 0]);

        let gas = PacketCodec::encode(&Control::GasValveClose { room: 0 });
        assert_eq!(gas.command(), 0x02);

        let lift = PacketCodec::encode(&Control::ElevatorCall { room: 3 });
        assert_eq!(lift.dest(), WALLPAD);
        assert_eq!(lift.src(), [0x44, 0x03]);
        assert_eq!(lift.command(), 0x01);

        let query = PacketCodec::encode(&Control::Query { device: DeviceType::GasValve, room: 0 });
        assert_eq!(query.command(), 0x3A);
        assert_eq!(query.payload(), [0; 8]);
    }
}
