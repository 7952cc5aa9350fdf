//! Link liveness tracking: heartbeat scheduling and availability inference.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::shared::Shared;
use super::{ProbeKind, Request};
use crate::protocol::{Control, PacketCodec};
use crate::types::DeviceType;

/// Externally visible link condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Frames are arriving.
    Connected,
    /// Link is up but nothing has been received since it was (re)established.
    Idle,
    /// The bus went quiet long enough that a keep-alive query was sent.
    SparseHeartbeatDue,
    /// Link is up but no frame has been received within the availability timeout.
    Unavailable,
    /// No link, including before the first connect.
    Reconnecting,
}

impl ConnectionState {
    /// Whether a link is currently installed.
    pub fn is_linked(self) -> bool {
        !matches!(self, ConnectionState::Reconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Idle => "idle",
            ConnectionState::SparseHeartbeatDue => "sparse_heartbeat_due",
            ConnectionState::Unavailable => "unavailable",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// What a monitor tick decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TickOutcome {
    pub heartbeat_due: bool,
    /// Set when availability flipped to unavailable on this tick.
    pub lost_availability: bool,
}

/// Timestamps and state of the current link.
#[derive(Debug)]
pub(crate) struct LinkMonitor {
    state: ConnectionState,
    available: bool,
    /// Last frame received or written.
    last_activity: Instant,
    /// Last valid frame received.
    last_receive: Instant,
    /// Last raw bytes received, valid or not.
    last_bytes: Instant,
    /// When the current link came up.
    linked_at: Instant,
    last_heartbeat: Option<Instant>,
    heartbeats: u64,
}

impl LinkMonitor {
    pub fn new(now: Instant) -> Self {
        Self {
            state: ConnectionState::Reconnecting,
            available: false,
            last_activity: now,
            last_receive: now,
            last_bytes: now,
            linked_at: now,
            last_heartbeat: None,
            heartbeats: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn available(&self) -> bool {
        self.available
    }

    pub fn heartbeats(&self) -> u64 {
        self.heartbeats
    }

    pub fn on_connected(&mut self, now: Instant) {
        self.state = ConnectionState::Idle;
        self.linked_at = now;
        self.last_activity = now;
        self.last_bytes = now;
    }

    pub fn on_disconnected(&mut self) {
        self.state = ConnectionState::Reconnecting;
    }

    pub fn on_bytes(&mut self, now: Instant) {
        self.last_bytes = now;
    }

    /// Records a valid frame. Returns true when the link just became available.
    pub fn on_receive(&mut self, now: Instant) -> bool {
        self.last_receive = now;
        self.last_activity = now;
        self.last_bytes = now;
        if self.state.is_linked() {
            self.state = ConnectionState::Connected;
        }
        !std::mem::replace(&mut self.available, true)
    }

    pub fn on_transmit(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Time the receive line has been quiet.
    pub fn quiet_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_bytes)
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_receive)
    }

    pub fn tick(
        &mut self,
        now: Instant,
        heartbeat_interval: Duration,
        availability_timeout: Duration,
    ) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        // Availability follows receive silence alone, across reconnects.
        if self.silent_for(now) >= availability_timeout {
            outcome.lost_availability = std::mem::replace(&mut self.available, false);
        }
        // A link that never delivers a frame is measured from when it came up.
        let heard_or_linked = self.last_receive.max(self.linked_at);
        let link_silent = now.saturating_duration_since(heard_or_linked) >= availability_timeout;
        if self.state.is_linked() && (outcome.lost_availability || link_silent) {
            self.state = ConnectionState::Unavailable;
        }

        let heartbeat_spaced = self
            .last_heartbeat
            .is_none_or(|at| now.saturating_duration_since(at) >= heartbeat_interval);
        if self.state.is_linked() && self.idle_for(now) >= heartbeat_interval && heartbeat_spaced {
            self.last_heartbeat = Some(now);
            self.heartbeats += 1;
            outcome.heartbeat_due = true;
            if self.state != ConnectionState::Unavailable {
                self.state = ConnectionState::SparseHeartbeatDue;
            }
        }
        outcome
    }
}

/// Keep-alive probe: the gas valve answers queries without an audible beep.
pub(crate) fn heartbeat_control() -> Control {
    Control::Query { device: DeviceType::GasValve, room: 0 }
}

/// Periodic liveness task.
pub(crate) async fn run(
    shared: Arc<Shared>,
    queue: mpsc::Sender<Request>,
    cancel: CancellationToken,
) {
    let config = shared.config();
    let (heartbeat_interval, availability_timeout) =
        (config.heartbeat_interval(), config.availability_timeout());
    let mut ticker = interval(config.monitor_tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Link monitor started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let outcome = shared
            .with_monitor(|m| m.tick(Instant::now(), heartbeat_interval, availability_timeout));

        if outcome.lost_availability {
            warn!(timeout = ?availability_timeout, "No frames received, gateway unavailable");
        }
        if outcome.heartbeat_due {
            let frame = PacketCodec::encode(&heartbeat_control());
            match queue.try_send(Request::Probe { frame, kind: ProbeKind::Heartbeat }) {
                Ok(()) => debug!("Bus quiet, queued heartbeat query"),
                Err(TrySendError::Full(_)) => debug!("Queue full, skipping heartbeat"),
                Err(TrySendError::Closed(_)) => break,
            }
        }
    }

    info!("Link monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    const HB: Duration = Duration::from_secs(300);
    const AVAIL: Duration = Duration::from_secs(1800);

    #[test]
    fn connect_is_idle_until_first_frame() {
        let t0 = Instant::now();
        let mut monitor = LinkMonitor::new(t0);
        assert_eq!(monitor.state(), ConnectionState::Reconnecting);

        monitor.on_connected(t0);
        assert_eq!(monitor.state(), ConnectionState::Idle);
        assert!(monitor.on_receive(t0 + Duration::from_secs(1)));
        assert_eq!(monitor.state(), ConnectionState::Connected);
        assert!(!monitor.on_receive(t0 + Duration::from_secs(2)), "already available");
    }

    #[test]
    fn one_heartbeat_per_quiet_interval() {
        let t0 = Instant::now();
        let mut monitor = LinkMonitor::new(t0);
        monitor.on_connected(t0);
        monitor.on_receive(t0);

        assert!(!monitor.tick(t0 + Duration::from_secs(299), HB, AVAIL).heartbeat_due);
        assert!(monitor.tick(t0 + HB, HB, AVAIL).heartbeat_due);
        assert_eq!(monitor.state(), ConnectionState::SparseHeartbeatDue);

        // Nothing answered and nothing was written: still spaced by the interval.
        assert!(!monitor.tick(t0 + HB + Duration::from_secs(1), HB, AVAIL).heartbeat_due);
        assert!(monitor.tick(t0 + HB * 2, HB, AVAIL).heartbeat_due);
        assert_eq!(monitor.heartbeats(), 2);
    }

    #[test]
    fn traffic_postpones_heartbeat() {
        let t0 = Instant::now();
        let mut monitor = LinkMonitor::new(t0);
        monitor.on_connected(t0);
        monitor.on_transmit(t0 + Duration::from_secs(200));
        assert!(!monitor.tick(t0 + HB, HB, AVAIL).heartbeat_due);
        assert!(monitor.tick(t0 + Duration::from_secs(500), HB, AVAIL).heartbeat_due);
    }

    #[test]
    fn silence_makes_link_unavailable() {
        let t0 = Instant::now();
        let mut monitor = LinkMonitor::new(t0);
        monitor.on_connected(t0);
        monitor.on_receive(t0);

        let outcome = monitor.tick(t0 + AVAIL, HB, AVAIL);
        assert!(outcome.lost_availability);
        assert!(!monitor.available());
        assert_eq!(monitor.state(), ConnectionState::Unavailable);
        assert!(!monitor.tick(t0 + AVAIL * 2, HB, AVAIL).lost_availability);

        assert!(monitor.on_receive(t0 + AVAIL * 2));
        assert_eq!(monitor.state(), ConnectionState::Connected);
    }

    #[test]
    fn link_that_never_answers_becomes_unavailable() {
        let t0 = Instant::now();
        let mut monitor = LinkMonitor::new(t0);
        monitor.on_connected(t0);

        let minutes = |m: u64| t0 + Duration::from_secs(m * 60);
        assert!(monitor.tick(minutes(5), HB, AVAIL).heartbeat_due);
        assert_eq!(monitor.state(), ConnectionState::SparseHeartbeatDue);

        // Never available, so there is no edge to report.
        let outcome = monitor.tick(minutes(30), HB, AVAIL);
        assert!(!outcome.lost_availability);
        assert_eq!(monitor.state(), ConnectionState::Unavailable);
        monitor.tick(minutes(60), HB, AVAIL);
        assert_eq!(monitor.state(), ConnectionState::Unavailable);

        assert!(monitor.on_receive(minutes(61)));
        assert_eq!(monitor.state(), ConnectionState::Connected);
    }

    #[test]
    fn heartbeat_answer_returns_to_connected() {
        let t0 = Instant::now();
        let mut monitor = LinkMonitor::new(t0);
        monitor.on_connected(t0);
        monitor.on_receive(t0);

        assert!(monitor.tick(t0 + HB, HB, AVAIL).heartbeat_due);
        assert_eq!(monitor.state(), ConnectionState::SparseHeartbeatDue);
        monitor.on_transmit(t0 + HB);
        assert!(!monitor.on_receive(t0 + HB + Duration::from_millis(40)));
        assert_eq!(monitor.state(), ConnectionState::Connected);
        assert!(monitor.available());
    }

    #[test]
    fn reconnects_do_not_hide_receive_silence() {
        let t0 = Instant::now();
        let mut monitor = LinkMonitor::new(t0);
        monitor.on_connected(t0);
        monitor.on_receive(t0);

        monitor.on_disconnected();
        monitor.on_connected(t0 + Duration::from_secs(20 * 60));
        let outcome = monitor.tick(t0 + AVAIL, HB, AVAIL);
        assert!(outcome.lost_availability);
        assert_eq!(monitor.state(), ConnectionState::Unavailable);
    }

    #[test]
    fn no_heartbeat_without_link() {
        let t0 = Instant::now();
        let mut monitor = LinkMonitor::new(t0);
        monitor.on_connected(t0);
        monitor.on_disconnected();
        assert!(!monitor.tick(t0 + HB * 3, HB, AVAIL).heartbeat_due);
        assert_eq!(monitor.state(), ConnectionState::Reconnecting);
    }
}
