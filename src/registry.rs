//! Shadow store of the last-known full state of every device.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::protocol::{Frame, PacketCodec};
use crate::types::{
    Attributes, ChangeKind, DeviceEvent, DeviceKey, DeviceState, Platform, StateChange,
};

/// Result of merging one event into the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// First state for this key.
    Created(DeviceState),
    /// At least one attribute value changed.
    Changed(DeviceState),
    /// Known key, identical values.
    Unchanged,
    /// Unknown key and the event is not allowed to register it.
    Skipped,
}

impl UpdateOutcome {
    /// Notification to publish, if any.
    pub fn into_change(self) -> Option<StateChange> {
        match self {
            UpdateOutcome::Created(state) => Some(StateChange { kind: ChangeKind::New, state }),
            UpdateOutcome::Changed(state) => Some(StateChange { kind: ChangeKind::Updated, state }),
            UpdateOutcome::Unchanged | UpdateOutcome::Skipped => None,
        }
    }
}

/// One device's persisted state.
///
/// The frame alone is not enough: attributes a family omits from some
/// reports (a thermostat's set-point while off) live only in `attrs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedState {
    pub key: DeviceKey,
    /// Hex of the most recent frame.
    pub frame: String,
    #[serde(default)]
    pub attrs: Attributes,
}

impl SavedState {
    pub fn new(key: DeviceKey, frame: &Frame) -> Self {
        Self { key, frame: frame.to_hex(), attrs: Attributes::new() }
    }
}

/// Per-gateway device state store.
///
/// All mutation goes through [`update`](Self::update) and
/// [`update_forced`](Self::update_forced) under one write lock, so readers
/// never see a half-merged state. Entries are never removed.
#[derive(Debug, Default)]
pub struct DeviceStateRegistry {
    states: RwLock<HashMap<DeviceKey, DeviceState>>,
}

impl DeviceStateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<DeviceKey, DeviceState>> {
        self.states.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<DeviceKey, DeviceState>> {
        self.states.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &DeviceKey) -> Option<DeviceState> {
        self.read().get(key).cloned()
    }

    pub fn contains(&self, key: &DeviceKey) -> bool {
        self.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Merges a decoded event, creating the entry only if the event registers.
    pub fn update(&self, event: &DeviceEvent) -> UpdateOutcome {
        merge(&mut self.write(), event, event.registers)
    }

    /// Merges an event that confirms an explicit command, always creating the
    /// entry. Returns the resulting state alongside the outcome.
    pub fn update_forced(&self, event: &DeviceEvent) -> (DeviceState, UpdateOutcome) {
        let mut states = self.write();
        let outcome = merge(&mut states, event, true);
        let state = match &outcome {
            UpdateOutcome::Created(state) | UpdateOutcome::Changed(state) => state.clone(),
            UpdateOutcome::Unchanged | UpdateOutcome::Skipped => match states.get(&event.key) {
                Some(state) => state.clone(),
                None => DeviceState::from_event(event),
            },
        };
        (state, outcome)
    }

    /// Consistent snapshot of several keys under one lock acquisition.
    pub fn snapshot_many(&self, keys: &[DeviceKey]) -> Vec<Option<DeviceState>> {
        let states = self.read();
        keys.iter().map(|key| states.get(key).cloned()).collect()
    }

    /// All states of one platform, ordered by key.
    pub fn by_platform(&self, platform: Platform) -> Vec<DeviceState> {
        let mut out: Vec<_> =
            self.read().values().filter(|s| s.platform == platform).cloned().collect();
        out.sort_by_key(|s| s.key);
        out
    }

    /// All states, ordered by key.
    pub fn all(&self) -> Vec<DeviceState> {
        let mut out: Vec<_> = self.read().values().cloned().collect();
        out.sort_by_key(|s| s.key);
        out
    }

    pub fn counts_by_platform(&self) -> BTreeMap<Platform, usize> {
        let mut counts = BTreeMap::new();
        for state in self.read().values() {
            *counts.entry(state.platform).or_insert(0) += 1;
        }
        counts
    }

    /// States to persist so a later session can [`restore`](Self::restore).
    pub fn saved_states(&self) -> Vec<SavedState> {
        self.all()
            .into_iter()
            .map(|s| SavedState { key: s.key, frame: s.last_frame.to_hex(), attrs: s.attrs })
            .collect()
    }

    /// Replays persisted states without touching the bus.
    ///
    /// Each key is rebuilt from its saved attributes with its own frame
    /// decoded on top, and is registered even if its event would not normally
    /// register (a light slot last seen off). Entries whose frame fails to
    /// parse are skipped. Returns the number of keys restored.
    pub fn restore<I>(&self, saved: I) -> usize
    where
        I: IntoIterator<Item = SavedState>,
    {
        let mut restored = 0;
        for SavedState { key, frame, attrs } in saved {
            let frame = match Frame::from_hex(&frame) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(%key, "Skipping unrestorable frame: {}", e);
                    continue;
                }
            };
            let decoded = PacketCodec::decode(&frame)
                .and_then(|events| events.into_iter().find(|e| e.key == key));
            let Some(decoded) = decoded else {
                debug!(%key, "Saved frame carries no state for this key");
                continue;
            };

            let mut event = DeviceEvent::new(key, frame);
            event.attrs = attrs.into_iter().map(|(attr, v)| (attr, v.retyped(attr))).collect();
            event.attrs.extend(decoded.attrs);
            merge(&mut self.write(), &event, true);
            restored += 1;
        }
        info!(restored, "Restored device states from saved frames");
        restored
    }
}

fn merge(
    states: &mut HashMap<DeviceKey, DeviceState>,
    event: &DeviceEvent,
    allow_insert: bool,
) -> UpdateOutcome {
    match states.get_mut(&event.key) {
        Some(state) => {
            let mut changed = false;
            for (attr, value) in &event.attrs {
                if state.attrs.get(attr) != Some(value) {
                    state.attrs.insert(*attr, value.clone());
                    changed = true;
                }
            }
            state.updated_at = Instant::now();
            state.last_frame = event.frame;
            state.updates += 1;
            if changed {
                debug!(key = %event.key, "Device state changed");
                UpdateOutcome::Changed(state.clone())
            } else {
                UpdateOutcome::Unchanged
            }
        }
        None if allow_insert => {
            info!(key = %event.key, platform = ?event.platform, "New device detected");
            let state = DeviceState::from_event(event);
            states.insert(event.key, state.clone());
            UpdateOutcome::Created(state)
        }
        None => UpdateOutcome::Skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WALLPAD;
    use crate::types::{Attr, DeviceType, HvacMode, Value};

    fn light_frame(room: u8, slots: [u8; 8]) -> Frame {
        Frame::build_with_type(0xDC, WALLPAD, [0x0E, room], 0x00, slots)
    }

    fn light_events(room: u8, slots: [u8; 8]) -> Vec<DeviceEvent> {
        PacketCodec::decode(&light_frame(room, slots)).unwrap()
    }

    #[test]
    fn off_slots_are_not_registered() {
        let registry = DeviceStateRegistry::new();
        for event in light_events(1, [0xFF, 0, 0, 0, 0, 0, 0, 0]) {
            registry.update(&event);
        }
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&DeviceKey::new(DeviceType::Light, 1)));
    }

    #[test]
    fn merge_reports_changes_once() {
        let registry = DeviceStateRegistry::new();
        let on = light_events(1, [0xFF, 0, 0, 0, 0, 0, 0, 0]).remove(0);
        let off = light_events(1, [0; 8]).remove(0);

        assert!(matches!(registry.update(&on), UpdateOutcome::Created(_)));
        assert_eq!(registry.update(&on), UpdateOutcome::Unchanged);
        let UpdateOutcome::Changed(state) = registry.update(&off) else {
            panic!("expected a change");
        };
        assert_eq!(state.power(), Some(false));
        assert_eq!(state.updates, 3);
    }

    #[test]
    fn merge_keeps_attributes_the_event_omits() {
        let registry = DeviceStateRegistry::new();
        let frame = light_frame(1, [0; 8]);
        let key = DeviceKey::new(DeviceType::Thermostat, 1);
        let heat = DeviceEvent::new(key, frame)
            .with(Attr::HvacMode, HvacMode::Heat)
            .with(Attr::TargetTemp, 24u8);
        let off = DeviceEvent::new(key, frame).with(Attr::HvacMode, HvacMode::Off);
        registry.update(&heat);
        registry.update(&off);

        let state = registry.get(&key).unwrap();
        assert_eq!(state.hvac_mode(), Some(HvacMode::Off));
        assert_eq!(state.target_temp(), Some(24));
    }

    #[test]
    fn forced_update_registers_unseen_slot() {
        let registry = DeviceStateRegistry::new();
        let off = light_events(2, [0; 8]).remove(3);
        assert_eq!(registry.update(&off), UpdateOutcome::Skipped);

        let (state, outcome) = registry.update_forced(&off);
        assert!(matches!(outcome, UpdateOutcome::Created(_)));
        assert_eq!(state.get(Attr::Power), Some(&Value::Bool(false)));

        let (_, again) = registry.update_forced(&off);
        assert_eq!(again, UpdateOutcome::Unchanged);
    }

    #[test]
    fn snapshots_and_counts() {
        let registry = DeviceStateRegistry::new();
        for event in light_events(1, [0xFF, 0xFF, 0, 0, 0, 0, 0, 0]) {
            registry.update(&event);
        }
        let keys: Vec<_> =
            (0..3).map(|i| DeviceKey::new(DeviceType::Light, 1).with_index(i)).collect();
        let snap = registry.snapshot_many(&keys);
        assert!(snap[0].is_some() && snap[1].is_some() && snap[2].is_none());
        assert_eq!(registry.counts_by_platform().get(&Platform::Light), Some(&2));
        assert_eq!(registry.by_platform(Platform::Climate).len(), 0);
    }

    #[test]
    fn restore_replays_saved_frames() {
        let original = DeviceStateRegistry::new();
        let on = light_events(1, [0xFF, 0, 0, 0, 0, 0, 0, 0]).remove(0);
        let off_slot = light_events(1, [0; 8]).remove(4);
        original.update(&on);
        original.update_forced(&off_slot);
        let saved = original.saved_states();
        assert_eq!(saved.len(), 2);

        let restored = DeviceStateRegistry::new();
        assert_eq!(restored.restore(saved), 2);
        assert!(restored.contains(&off_slot.key));
        assert_eq!(restored.get(&on.key).and_then(|s| s.power()), Some(true));

        let bogus = DeviceKey::new(DeviceType::Outlet, 9);
        let unreadable =
            SavedState { key: bogus, frame: "not hex".into(), attrs: Attributes::new() };
        assert_eq!(restored.restore([unreadable]), 0);
    }

    #[test]
    fn restore_keeps_set_point_of_a_thermostat_saved_while_off() {
        let key = DeviceKey::new(DeviceType::Thermostat, 1);
        let thermostat = |payload| {
            Frame::build_with_type(0xDC, WALLPAD, [DeviceType::Thermostat.code(), 1], 0x00, payload)
        };
        let heating = thermostat([0x11, 0, 24, 0, 21, 0, 0, 0]);
        let off = thermostat([0x01, 0, 0, 0, 21, 0, 0, 0]);
        let original = DeviceStateRegistry::new();
        for frame in [heating, off] {
            for event in PacketCodec::decode(&frame).unwrap() {
                original.update(&event);
            }
        }
        assert_eq!(original.get(&key).unwrap().target_temp(), Some(24));

        let yaml = serde_yaml_ng::to_string(&original.saved_states()).unwrap();
        let saved: Vec<SavedState> = serde_yaml_ng::from_str(&yaml).unwrap();
        let restored = DeviceStateRegistry::new();
        restored.restore(saved);

        let state = restored.get(&key).unwrap();
        assert_eq!(state.hvac_mode(), Some(HvacMode::Off));
        assert_eq!(state.target_temp(), Some(24));
        assert_eq!(state.last_frame, off);
    }

    #[test]
    fn restore_accepts_frame_only_entries() {
        let frame = light_frame(2, [0, 0xFF, 0, 0, 0, 0, 0, 0]);
        let key = DeviceKey::new(DeviceType::Light, 2).with_index(1);
        let restored = DeviceStateRegistry::new();
        assert_eq!(restored.restore([SavedState::new(key, &frame)]), 1);
        assert_eq!(restored.get(&key).and_then(|s| s.power()), Some(true));
    }
}
