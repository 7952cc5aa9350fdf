//! Gateway configuration.
//!
//! Every field has a documented default, so an empty YAML document is a
//! valid configuration:
//!
//! ```rust
//! use kocom_wallpad::Config;
//!
//! let config = Config::from_yaml_str("transport:\n  host: 192.168.0.20\n").unwrap();
//! assert_eq!(config.transport.port, 8899);
//! assert_eq!(config.gateway.queue_capacity, 50);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::gateway::ReconnectConfig;
use crate::transport::TcpConfig;
use crate::types::DeviceType;
use crate::{Result, WallpadError};

/// One discovery probe destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryTarget {
    pub device: DeviceType,
    pub room: u8,
}

impl DiscoveryTarget {
    pub const fn new(device: DeviceType, room: u8) -> Self {
        Self { device, room }
    }
}

/// Default discovery targets: lights and outlets in rooms 0-4, the
/// ventilation unit and the gas valve.
pub fn default_discovery_targets() -> Vec<DiscoveryTarget> {
    let banks = (0..5u8).flat_map(|room| {
        [DeviceType::Light, DeviceType::Outlet].map(|device| DiscoveryTarget::new(device, room))
    });
    banks
        .chain([
            DiscoveryTarget::new(DeviceType::Ventilation, 0),
            DiscoveryTarget::new(DeviceType::GasValve, 0),
        ])
        .collect()
}

/// Supervisor, dispatch and protocol tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Silence after which a single keep-alive query is sent.
    pub heartbeat_interval_secs: u64,
    /// Receive silence after which the link is reported unavailable.
    pub availability_timeout_secs: u64,
    /// Minimum spacing between discovery sweeps.
    pub discovery_min_interval_secs: u64,
    /// Total send attempts per command.
    pub retry_count: u32,
    pub ack_timeout_ms: u64,
    /// ACK window for slow actuators (gas valve, set-point changes).
    pub slow_ack_timeout_ms: u64,
    pub retry_gap_ms: u64,
    /// Quiet time that counts as an idle bus.
    pub idle_gap_ms: u64,
    /// Longest wait for an idle bus before sending anyway.
    pub idle_wait_max_ms: u64,
    pub monitor_tick_ms: u64,
    pub queue_capacity: usize,
    pub ring_capacity: usize,
    pub event_channel_capacity: usize,
    pub discover_on_start: bool,
    pub discovery_targets: Vec<DiscoveryTarget>,
    pub reconnect: ReconnectConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 300,
            availability_timeout_secs: 1800,
            discovery_min_interval_secs: 60,
            retry_count: 3,
            ack_timeout_ms: 1_000,
            slow_ack_timeout_ms: 1_500,
            retry_gap_ms: 150,
            idle_gap_ms: 200,
            idle_wait_max_ms: 1_000,
            monitor_tick_ms: 1_000,
            queue_capacity: 50,
            ring_capacity: 1024,
            event_channel_capacity: 256,
            discover_on_start: true,
            discovery_targets: default_discovery_targets(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn availability_timeout(&self) -> Duration {
        Duration::from_secs(self.availability_timeout_secs)
    }

    pub fn discovery_min_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_min_interval_secs)
    }

    /// ACK window for a command.
    pub fn ack_timeout(&self, slow: bool) -> Duration {
        Duration::from_millis(if slow { self.slow_ack_timeout_ms } else { self.ack_timeout_ms })
    }

    pub fn retry_gap(&self) -> Duration {
        Duration::from_millis(self.retry_gap_ms)
    }

    pub fn idle_gap(&self) -> Duration {
        Duration::from_millis(self.idle_gap_ms)
    }

    pub fn idle_wait_max(&self) -> Duration {
        Duration::from_millis(self.idle_wait_max_ms)
    }

    pub fn monitor_tick(&self) -> Duration {
        Duration::from_millis(self.monitor_tick_ms)
    }

    /// Rejects values the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("availability_timeout_secs", self.availability_timeout_secs),
            ("retry_count", u64::from(self.retry_count)),
            ("ack_timeout_ms", self.ack_timeout_ms),
            ("slow_ack_timeout_ms", self.slow_ack_timeout_ms),
            ("monitor_tick_ms", self.monitor_tick_ms),
            ("queue_capacity", self.queue_capacity as u64),
            ("event_channel_capacity", self.event_channel_capacity as u64),
            ("reconnect.initial_delay_ms", self.reconnect.initial_delay_ms),
        ];
        if let Some((field, _)) = nonzero.iter().find(|(_, value)| *value == 0) {
            return Err(WallpadError::config(format!("{field} must be greater than zero")));
        }
        if self.ring_capacity < 2 * crate::protocol::FRAME_LEN {
            return Err(WallpadError::config(format!(
                "ring_capacity must hold at least two frames ({} bytes)",
                2 * crate::protocol::FRAME_LEN
            )));
        }
        if self.availability_timeout_secs < self.heartbeat_interval_secs {
            return Err(WallpadError::config(
                "availability_timeout_secs must not be shorter than heartbeat_interval_secs",
            ));
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(WallpadError::config("reconnect.max_delay_ms is below initial_delay_ms"));
        }
        if let Some(target) = self.discovery_targets.iter().find(|t| t.device.beeps_on_query()) {
            return Err(WallpadError::config(format!(
                "{} cannot be a discovery target: its panel beeps when queried",
                target.device
            )));
        }
        Ok(())
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TcpConfig,
    pub gateway: GatewayConfig,
}

impl Config {
    /// Parses and validates a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to an empty map.
        let config: Config =
            if yaml.trim().is_empty() { Config::default() } else { serde_yaml_ng::from_str(yaml)? };
        config.gateway.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| WallpadError::Config {
            reason: format!("cannot read {}", path.display()),
            source: Some(Box::new(e)),
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }
}
