//! Domain types shared by the codec, registry and gateway.

pub mod command;
pub mod device;
pub mod state;
pub mod value;

pub use command::Command;
pub use device::{DeviceKey, DeviceType, LIGHT_CUTOFF_ROOM, Platform, SubType};
pub use state::{ChangeKind, DeviceEvent, DeviceState, StateChange};
pub use value::{
    Attr, Attributes, ElevatorDirection, FanMode, HvacMode, SPEED_LEVELS, Value, VentPreset,
    speed_for_percentage, speed_percentage,
};
