//! Decoded events and the shadow state they are merged into.

use serde::Serialize;
use tokio::time::Instant;

use super::{Attr, Attributes, DeviceKey, ElevatorDirection, FanMode, HvacMode, Platform, Value};
use crate::protocol::Frame;

/// Attribute changes decoded from a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEvent {
    pub key: DeviceKey,
    pub platform: Platform,
    pub attrs: Attributes,
    /// Whether the event may create a registry entry for a never-seen key.
    pub registers: bool,
    /// Frame the event was decoded from.
    pub frame: Frame,
}

impl DeviceEvent {
    pub fn new(key: DeviceKey, frame: Frame) -> Self {
        Self { key, platform: key.platform(), attrs: Attributes::new(), registers: true, frame }
    }

    pub fn with(mut self, attr: Attr, value: impl Into<Value>) -> Self {
        self.attrs.insert(attr, value.into());
        self
    }

    pub fn registering(mut self, registers: bool) -> Self {
        self.registers = registers;
        self
    }

    pub fn get(&self, attr: Attr) -> Option<&Value> {
        self.attrs.get(&attr)
    }

    /// True when every requested change is reflected in this event.
    pub fn satisfies(&self, changes: &Attributes) -> bool {
        changes.iter().all(|(attr, want)| self.attrs.get(attr) == Some(want))
    }
}

/// Last-known full state of one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
    pub key: DeviceKey,
    pub platform: Platform,
    pub attrs: Attributes,
    #[serde(skip)]
    pub updated_at: Instant,
    /// Raw frame of the most recent update, for restoring after restart.
    pub last_frame: Frame,
    pub updates: u64,
}

impl DeviceState {
    pub(crate) fn from_event(event: &DeviceEvent) -> Self {
        Self {
            key: event.key,
            platform: event.platform,
            attrs: event.attrs.clone(),
            updated_at: Instant::now(),
            last_frame: event.frame,
            updates: 1,
        }
    }

    pub fn get(&self, attr: Attr) -> Option<&Value> {
        self.attrs.get(&attr)
    }

    pub fn power(&self) -> Option<bool> {
        self.get(Attr::Power).and_then(Value::as_bool)
    }

    pub fn hvac_mode(&self) -> Option<HvacMode> {
        self.get(Attr::HvacMode).and_then(Value::as_hvac)
    }

    pub fn fan_mode(&self) -> Option<FanMode> {
        self.get(Attr::FanMode).and_then(Value::as_fan)
    }

    pub fn target_temp(&self) -> Option<i32> {
        self.get(Attr::TargetTemp).and_then(Value::as_int)
    }

    pub fn current_temp(&self) -> Option<i32> {
        self.get(Attr::CurrentTemp).and_then(Value::as_int)
    }

    pub fn direction(&self) -> Option<ElevatorDirection> {
        self.get(Attr::Direction).and_then(Value::as_direction)
    }

    pub fn reading(&self) -> Option<i32> {
        self.get(Attr::Reading).and_then(Value::as_int)
    }
}

/// Whether a broadcast state is new or an update of a known key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    New,
    Updated,
}

/// Notification published whenever the registry changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChange {
    pub kind: ChangeKind,
    pub state: DeviceState,
}
