//! Throttled device discovery.
//!
//! Discovery writes one status query per configured target and relies on
//! the normal read path to register whatever answers. Families whose panels
//! beep when queried are never probed.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use super::shared::Shared;
use super::{ProbeKind, Request};
use crate::config::DiscoveryTarget;
use crate::protocol::{Control, Frame, PacketCodec};
use crate::{Result, WallpadError};

/// Result of a discovery request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// Probes were queued.
    Started { probes: usize },
    /// A sweep ran too recently.
    Throttled { retry_in: Duration },
}

/// Enforces the minimum spacing between sweeps.
#[derive(Debug)]
pub(crate) struct DiscoveryThrottle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl DiscoveryThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last: None }
    }

    /// Claims a sweep at `now`, or reports how long until one is allowed.
    pub fn try_start(&mut self, now: Instant) -> std::result::Result<(), Duration> {
        if let Some(last) = self.last {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.min_interval {
                return Err(self.min_interval - elapsed);
            }
        }
        self.last = Some(now);
        Ok(())
    }

    pub fn last(&self) -> Option<Instant> {
        self.last
    }
}

/// Query frames for every target that may be probed.
pub fn probe_frames(targets: &[DiscoveryTarget]) -> Vec<Frame> {
    targets
        .iter()
        .filter(|t| !t.device.beeps_on_query())
        .map(|t| PacketCodec::encode(&Control::Query { device: t.device, room: t.room }))
        .collect()
}

/// Queues a discovery sweep unless one ran within the minimum interval.
///
/// Without a link nothing is queued and the throttle window is left unclaimed.
pub(crate) async fn start(
    shared: &Shared,
    queue: &mpsc::Sender<Request>,
) -> Result<DiscoveryOutcome> {
    if !shared.is_linked() {
        return Err(WallpadError::NotConnected);
    }
    if let Err(retry_in) = shared.claim_discovery(Instant::now()) {
        debug!(?retry_in, "Discovery throttled");
        return Ok(DiscoveryOutcome::Throttled { retry_in });
    }

    let frames = probe_frames(&shared.config().discovery_targets);
    info!(probes = frames.len(), "Starting device discovery");
    for frame in &frames {
        let probe = Request::Probe { frame: *frame, kind: ProbeKind::Discovery };
        queue.send(probe).await.map_err(|_| WallpadError::Stopped)?;
    }
    Ok(DiscoveryOutcome::Started { probes: frames.len() })
}
