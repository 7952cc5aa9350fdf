//! Outbound queue consumer: paced writes with ACK-confirmed retry.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::shared::{AckWaiter, Shared};
use super::Request;
use crate::builder::{CommandBuilder, CommandPlan};
use crate::protocol::Frame;
use crate::types::{Command, DeviceState};
use crate::{Result, WallpadError};

pub(crate) async fn run(
    shared: Arc<Shared>,
    mut queue: mpsc::Receiver<Request>,
    cancel: CancellationToken,
) {
    info!("Dispatcher started");
    loop {
        let request = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            request = queue.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        match request {
            Request::Command { command, reply } => {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(WallpadError::Stopped),
                    result = execute(&shared, &command) => result,
                };
                let _ = reply.send(result);
            }
            Request::Probe { frame, kind } => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = probe(&shared, &frame) => {
                        if let Err(e) = result {
                            debug!(?kind, error = %e, "Probe not sent");
                        }
                    }
                }
            }
        }
    }

    // Fail everything still queued.
    queue.close();
    let mut stopped = 0;
    while let Ok(request) = queue.try_recv() {
        if let Request::Command { reply, .. } = request {
            let _ = reply.send(Err(WallpadError::Stopped));
            stopped += 1;
        }
    }
    info!(stopped, "Dispatcher stopped");
}

/// Sends one command until it is confirmed or the attempts run out.
async fn execute(shared: &Shared, command: &Command) -> Result<DeviceState> {
    let plan = CommandBuilder::new(&shared.registry).plan(command)?;
    let config = shared.config();
    let attempts = config.retry_count;
    let timeout = config.ack_timeout(plan.slow);

    for attempt in 1..=attempts {
        if attempt > 1 {
            tokio::time::sleep(config.retry_gap()).await;
        }
        if !shared.is_linked() {
            return Err(WallpadError::NotConnected);
        }
        shared.wait_for_idle_bus().await;

        let confirmation = await_confirmation(shared, &plan);
        if let Err(e) = shared.write_frame(&plan.frame).await {
            if !matches!(e, WallpadError::NotConnected) {
                shared.request_reconnect("write failed");
            }
            return Err(e);
        }
        debug!(key = %plan.key, attempt, frame = %plan.frame, "Command written");

        match tokio::time::timeout(timeout, confirmation).await {
            Ok(Ok(state)) => {
                info!(key = %plan.key, attempt, "Command acknowledged");
                return Ok(state);
            }
            Ok(Err(_)) => debug!(key = %plan.key, attempt, "Link dropped before confirmation"),
            Err(_) => warn!(key = %plan.key, attempt, ?timeout, "No confirmation"),
        }
    }

    error!(key = %plan.key, attempts, "Command failed after all attempts");
    Err(WallpadError::CommandFailed { key: plan.key, attempts })
}

/// Registers the waiter for one attempt. Registration precedes the write so a
/// fast reply cannot slip past.
fn await_confirmation(shared: &Shared, plan: &CommandPlan) -> oneshot::Receiver<DeviceState> {
    let (reply, confirmation) = oneshot::channel();
    shared.register_waiter(AckWaiter {
        key: plan.key,
        expect: plan.expect.clone(),
        sent: plan.frame,
        reply,
    });
    confirmation
}

/// Writes a query once, paced but unconfirmed.
async fn probe(shared: &Shared, frame: &Frame) -> Result<()> {
    if !shared.is_linked() {
        return Err(WallpadError::NotConnected);
    }
    shared.wait_for_idle_bus().await;
    if let Err(e) = shared.write_frame(frame).await {
        if !matches!(e, WallpadError::NotConnected) {
            shared.request_reconnect("write failed");
        }
        return Err(e);
    }
    Ok(())
}
