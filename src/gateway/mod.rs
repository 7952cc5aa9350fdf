//! Connection supervisor and command gateway.
//!
//! [`Gateway::spawn`] starts three tasks sharing one cancellation token:
//!
//! - the **link supervisor** connects through a [`Connector`], feeds every
//!   received chunk through the frame parser, codec and registry, and
//!   reconnects with backoff whenever the link fails;
//! - the **dispatcher** drains the bounded outbound queue, writing one frame
//!   at a time and retrying until the device confirms;
//! - the **monitor** sends a sparse heartbeat when the bus goes quiet and
//!   infers availability from receive silence.
//!
//! State changes are published on a broadcast channel; connection state and
//! availability on watch channels.

pub mod backoff;
pub mod diagnostics;
pub mod discovery;
mod dispatch;
pub mod monitor;
pub(crate) mod shared;
mod supervisor;


pub use backoff::{ReconnectConfig, calculate_backoff};
pub use diagnostics::Diagnostics;
pub use discovery::DiscoveryOutcome;
pub use monitor::ConnectionState;

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::protocol::Frame;
use crate::registry::{DeviceStateRegistry, SavedState};
use crate::stream::StateUpdates;
use crate::transport::Connector;
use crate::types::{Command, DeviceKey, DeviceState, StateChange};
use crate::{Result, WallpadError};
use shared::Shared;

/// Why a probe frame was queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProbeKind {
    Heartbeat,
    Discovery,
}

/// Item on the outbound queue.
pub(crate) enum Request {
    Command { command: Command, reply: oneshot::Sender<Result<DeviceState>> },
    /// Query written once without waiting for confirmation.
    Probe { frame: Frame, kind: ProbeKind },
}

/// Handle to a running gateway.
///
/// Dropping the handle cancels the background tasks; call
/// [`shutdown`](Self::shutdown) to also wait for them.
pub struct Gateway {
    shared: Arc<Shared>,
    queue: mpsc::Sender<Request>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
    /// Validates `config` and starts the gateway tasks on the current runtime.
    pub fn spawn(config: GatewayConfig, connector: impl Connector) -> Result<Self> {
        config.validate()?;
        let connector: Arc<dyn Connector> = Arc::new(connector);
        let shared = Arc::new(Shared::new(config, connector.describe()));
        let (queue, requests) = mpsc::channel(shared.config().queue_capacity);
        let cancel = CancellationToken::new();

        let mut tasks = vec![
            tokio::spawn(supervisor::run(shared.clone(), connector, cancel.clone())),
            tokio::spawn(dispatch::run(shared.clone(), requests, cancel.clone())),
            tokio::spawn(monitor::run(shared.clone(), queue.clone(), cancel.clone())),
        ];
        if shared.config().discover_on_start {
            tasks.push(tokio::spawn(discover_when_linked(
                shared.clone(),
                queue.clone(),
                cancel.clone(),
            )));
        }

        info!(endpoint = %shared.endpoint(), "Gateway started");
        Ok(Self { shared, queue, cancel, tasks: Mutex::new(tasks) })
    }

    /// Queues a command and waits for the device to confirm it.
    ///
    /// Returns the confirmed state. Fails immediately with
    /// [`WallpadError::QueueFull`] when the outbound queue is at capacity,
    /// and with [`WallpadError::NotConnected`] when no link is up by the time
    /// the command reaches the front of the queue.
    pub async fn send(&self, command: Command) -> Result<DeviceState> {
        if self.cancel.is_cancelled() {
            return Err(WallpadError::Stopped);
        }
        let key = command.key;
        let (reply, response) = oneshot::channel();
        match self.queue.try_send(Request::Command { command, reply }) {
            Ok(()) => debug!(%key, "Command queued"),
            Err(TrySendError::Full(_)) => {
                let capacity = self.shared.config().queue_capacity;
                warn!(%key, capacity, "Outbound queue full, rejecting command");
                return Err(WallpadError::QueueFull { capacity });
            }
            Err(TrySendError::Closed(_)) => return Err(WallpadError::Stopped),
        }
        response.await.unwrap_or(Err(WallpadError::Stopped))
    }

    /// Queues status queries for the configured discovery targets.
    ///
    /// Returns [`DiscoveryOutcome::Throttled`] when a sweep ran within the
    /// minimum discovery interval.
    ///
    /// # Errors
    ///
    /// Returns [`WallpadError::NotConnected`] while no link is up; the
    /// attempt does not count against the interval.
    pub async fn discover(&self) -> Result<DiscoveryOutcome> {
        if self.cancel.is_cancelled() {
            return Err(WallpadError::Stopped);
        }
        discovery::start(&self.shared, &self.queue).await
    }

    pub fn registry(&self) -> &Arc<DeviceStateRegistry> {
        &self.shared.registry
    }

    pub fn state(&self, key: &DeviceKey) -> Option<DeviceState> {
        self.shared.registry.get(key)
    }

    /// Raw change notifications. Slow receivers observe `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StateChange>> {
        self.shared.subscribe()
    }

    /// Change notifications as a stream, skipping over lag.
    pub fn updates(&self) -> StateUpdates {
        StateUpdates::new(self.shared.subscribe())
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.watch_state()
    }

    /// `true` while frames keep arriving within the availability timeout.
    pub fn availability(&self) -> watch::Receiver<bool> {
        self.shared.watch_available()
    }

    /// Replays persisted states into the registry without touching the bus.
    pub fn restore<I>(&self, saved: I) -> usize
    where
        I: IntoIterator<Item = SavedState>,
    {
        self.shared.registry.restore(saved)
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let shared = &self.shared;
        let now = Instant::now();
        let (connection_state, available, heartbeats, idle, silent) = shared.with_monitor(|m| {
            (m.state(), m.available(), m.heartbeats(), m.idle_for(now), m.silent_for(now))
        });
        Diagnostics {
            endpoint: shared.endpoint().to_string(),
            connection_state,
            available,
            reconnects: shared.reconnects(),
            heartbeats,
            idle_secs: idle.as_secs_f64(),
            silent_secs: silent.as_secs_f64(),
            queue_depth: self.queue.max_capacity() - self.queue.capacity(),
            pending_confirmations: shared.pending_confirmations(),
            last_discovery_secs_ago: shared
                .last_discovery()
                .map(|at| now.saturating_duration_since(at).as_secs_f64()),
            devices: shared.registry.counts_by_platform(),
            parser: shared.parser_stats(),
        }
    }

    /// Stops all tasks, closes the link, and fails queued and in-flight
    /// commands with [`WallpadError::Stopped`].
    pub async fn shutdown(&self) {
        info!("Shutting down gateway");
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Gateway task ended abnormally: {}", e);
            }
        }
        info!("Gateway stopped");
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Runs the startup discovery sweep once the first link is up.
async fn discover_when_linked(
    shared: Arc<Shared>,
    queue: mpsc::Sender<Request>,
    cancel: CancellationToken,
) {
    let mut state = shared.watch_state();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        linked = state.wait_for(|s| s.is_linked()) => {
            if linked.is_err() {
                return;
            }
        }
    }
    if let Err(e) = discovery::start(&shared, &queue).await {
        debug!(error = %e, "Startup discovery not started");
    }
}
