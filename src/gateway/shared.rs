//! State shared by the gateway's tasks and its handle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::discovery::DiscoveryThrottle;
use super::monitor::{ConnectionState, LinkMonitor};
use crate::config::GatewayConfig;
use crate::protocol::{Frame, PacketCodec, ParserStats};
use crate::registry::{DeviceStateRegistry, UpdateOutcome};
use crate::transport::ByteSink;
use crate::types::{Attributes, DeviceEvent, DeviceKey, DeviceState, StateChange};
use crate::{Result, WallpadError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A command waiting for its confirming event on the read path.
pub(crate) struct AckWaiter {
    pub key: DeviceKey,
    pub expect: Attributes,
    /// The frame that was written; a bus echo of it confirms nothing.
    pub sent: Frame,
    pub reply: oneshot::Sender<DeviceState>,
}

impl AckWaiter {
    fn confirmed_by(&self, event: &DeviceEvent) -> bool {
        event.key == self.key && event.frame != self.sent && event.satisfies(&self.expect)
    }
}

pub(crate) struct Shared {
    config: GatewayConfig,
    endpoint: String,
    pub registry: Arc<DeviceStateRegistry>,
    changes: broadcast::Sender<Arc<StateChange>>,
    state_tx: watch::Sender<ConnectionState>,
    available_tx: watch::Sender<bool>,
    monitor: Mutex<LinkMonitor>,
    waiters: Mutex<Vec<AckWaiter>>,
    sink: tokio::sync::Mutex<Option<Box<dyn ByteSink>>>,
    /// Token of the installed link; cancelling it tears the link down.
    link: Mutex<Option<CancellationToken>>,
    reconnecting: AtomicBool,
    reconnects: AtomicU64,
    discovery: Mutex<DiscoveryThrottle>,
    parser_stats: Mutex<ParserStats>,
}

impl Shared {
    pub fn new(config: GatewayConfig, endpoint: String) -> Self {
        let (changes, _) = broadcast::channel(config.event_channel_capacity);
        let discovery = DiscoveryThrottle::new(config.discovery_min_interval());
        Self {
            endpoint,
            registry: Arc::new(DeviceStateRegistry::new()),
            changes,
            state_tx: watch::Sender::new(ConnectionState::Reconnecting),
            available_tx: watch::Sender::new(false),
            monitor: Mutex::new(LinkMonitor::new(Instant::now())),
            waiters: Mutex::new(Vec::new()),
            sink: tokio::sync::Mutex::new(None),
            link: Mutex::new(None),
            reconnecting: AtomicBool::new(false),
            reconnects: AtomicU64::new(0),
            discovery: Mutex::new(discovery),
            parser_stats: Mutex::new(ParserStats::default()),
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    // ── Observers ────────────────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StateChange>> {
        self.changes.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn watch_available(&self) -> watch::Receiver<bool> {
        self.available_tx.subscribe()
    }

    fn publish(&self, outcome: UpdateOutcome) {
        if let Some(change) = outcome.into_change() {
            // No subscribers is fine.
            let _ = self.changes.send(Arc::new(change));
        }
    }

    /// Runs `f` against the monitor and republishes state and availability.
    pub fn with_monitor<R>(&self, f: impl FnOnce(&mut LinkMonitor) -> R) -> R {
        let mut monitor = lock(&self.monitor);
        let result = f(&mut monitor);
        let (state, available) = (monitor.state(), monitor.available());
        drop(monitor);

        self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            if changed {
                debug!(from = %current, to = %state, "Connection state changed");
                *current = state;
            }
            changed
        });
        self.available_tx
            .send_if_modified(|current| std::mem::replace(current, available) != available);
        result
    }

    // ── Link lifecycle ───────────────────────────────────────────────

    pub async fn install_link(&self, sink: Box<dyn ByteSink>, token: CancellationToken) {
        *self.sink.lock().await = Some(sink);
        *lock(&self.link) = Some(token);
        self.reconnecting.store(false, Ordering::SeqCst);
        self.with_monitor(|m| m.on_connected(Instant::now()));
    }

    pub async fn remove_link(&self) {
        lock(&self.link).take();
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink
            && let Err(e) = sink.close().await
        {
            debug!("Error closing link: {}", e);
        }
        // Nothing will confirm in-flight commands on this link any more.
        lock(&self.waiters).clear();
    }

    /// Tears down the current link and schedules a reconnect.
    ///
    /// Overlapping triggers (read failure and write failure on the same
    /// link) collapse into one reconnect cycle.
    pub fn request_reconnect(&self, reason: &str) {
        let claimed =
            self.reconnecting.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst);
        if claimed.is_err() {
            trace!(reason, "Reconnect already pending");
            return;
        }
        let count = self.reconnects.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(reason, reconnects = count, "Link lost, reconnecting");
        self.with_monitor(|m| m.on_disconnected());
        if let Some(token) = lock(&self.link).as_ref() {
            token.cancel();
        }
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn is_linked(&self) -> bool {
        lock(&self.link).as_ref().is_some_and(|token| !token.is_cancelled())
    }

    // ── Read path ────────────────────────────────────────────────────

    pub fn on_bytes(&self) {
        lock(&self.monitor).on_bytes(Instant::now());
    }

    pub fn set_parser_stats(&self, stats: ParserStats) {
        *lock(&self.parser_stats) = stats;
    }

    pub fn parser_stats(&self) -> ParserStats {
        *lock(&self.parser_stats)
    }

    /// Decodes a frame, merges its events and wakes confirmed commands.
    pub fn handle_frame(&self, frame: Frame) {
        if self.with_monitor(|m| m.on_receive(Instant::now())) {
            info!(endpoint = %self.endpoint, "Gateway available");
        }
        let Some(events) = PacketCodec::decode(&frame) else {
            return;
        };

        for event in events {
            match self.claim_waiter(&event) {
                Some(waiter) => {
                    let (state, outcome) = self.registry.update_forced(&event);
                    self.publish(outcome);
                    debug!(key = %event.key, "Command confirmed");
                    // The dispatcher may have given up in the meantime.
                    let _ = waiter.reply.send(state);
                }
                None => self.publish(self.registry.update(&event)),
            }
        }
    }

    fn claim_waiter(&self, event: &DeviceEvent) -> Option<AckWaiter> {
        let mut waiters = lock(&self.waiters);
        waiters.retain(|w| !w.reply.is_closed());
        let index = waiters.iter().position(|w| w.confirmed_by(event))?;
        Some(waiters.swap_remove(index))
    }

    // ── Write path ───────────────────────────────────────────────────

    pub fn register_waiter(&self, waiter: AckWaiter) {
        lock(&self.waiters).push(waiter);
    }

    pub fn pending_confirmations(&self) -> usize {
        lock(&self.waiters).iter().filter(|w| !w.reply.is_closed()).count()
    }

    /// Writes one frame to the installed link.
    pub async fn write_frame(&self, frame: &Frame) -> Result<()> {
        let mut sink = self.sink.lock().await;
        let Some(sink) = sink.as_mut() else {
            return Err(WallpadError::NotConnected);
        };
        trace!(frame = %frame, "Writing frame");
        sink.write_all(frame.as_bytes()).await.map_err(|e| match e {
            WallpadError::Transport { .. } => e,
            other => WallpadError::transport_with_source("write failed", Box::new(other)),
        })?;
        self.with_monitor(|m| m.on_transmit(Instant::now()));
        Ok(())
    }

    /// Waits until the receive line has been quiet for the idle gap, or
    /// until the idle wait limit passes.
    pub async fn wait_for_idle_bus(&self) {
        let (gap, limit) = (self.config.idle_gap(), self.config.idle_wait_max());
        let deadline = Instant::now() + limit;
        loop {
            let now = Instant::now();
            let quiet = lock(&self.monitor).quiet_for(now);
            if quiet >= gap {
                return;
            }
            if now >= deadline {
                debug!(?quiet, "Bus still busy, sending anyway");
                return;
            }
            let wait: Duration = (gap - quiet).min(deadline - now);
            tokio::time::sleep(wait).await;
        }
    }

    // ── Discovery ────────────────────────────────────────────────────

    pub fn claim_discovery(&self, now: Instant) -> std::result::Result<(), Duration> {
        lock(&self.discovery).try_start(now)
    }

    pub fn last_discovery(&self) -> Option<Instant> {
        lock(&self.discovery).last()
    }
}
