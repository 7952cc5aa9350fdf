//! Point-in-time gateway health report.

use serde::Serialize;
use std::collections::BTreeMap;

use super::monitor::ConnectionState;
use crate::Result;
use crate::protocol::ParserStats;
use crate::types::Platform;

/// Snapshot returned by [`Gateway::diagnostics`](super::Gateway::diagnostics).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub endpoint: String,
    pub connection_state: ConnectionState,
    pub available: bool,
    pub reconnects: u64,
    pub heartbeats: u64,
    /// Seconds since the last frame in either direction.
    pub idle_secs: f64,
    /// Seconds since the last frame was received.
    pub silent_secs: f64,
    pub queue_depth: usize,
    pub pending_confirmations: usize,
    pub last_discovery_secs_ago: Option<f64>,
    pub devices: BTreeMap<Platform, usize>,
    pub parser: ParserStats,
}

impl Diagnostics {
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    pub fn device_count(&self) -> usize {
        self.devices.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_as_yaml() {
        let diagnostics = Diagnostics {
            endpoint: "tcp://10.0.0.5:8899".to_string(),
            connection_state: ConnectionState::SparseHeartbeatDue,
            available: true,
            reconnects: 2,
            heartbeats: 1,
            idle_secs: 301.0,
            silent_secs: 301.0,
            queue_depth: 0,
            pending_confirmations: 0,
            last_discovery_secs_ago: None,
            devices: BTreeMap::from([(Platform::Light, 3), (Platform::Switch, 1)]),
            parser: ParserStats::default(),
        };
        let yaml = diagnostics.to_yaml().unwrap();
        assert!(yaml.contains("connection_state: sparse_heartbeat_due"));
        assert!(yaml.contains("light: 3"));
        assert_eq!(diagnostics.device_count(), 4);
    }
}
