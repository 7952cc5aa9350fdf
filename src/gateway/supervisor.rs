//! Link supervisor: connect, read, and reconnect with backoff.
//!
//! The supervisor owns the frame parser and the read half of each link.
//! Reconnects are silent: a fresh link gets no discovery or query traffic,
//! only whatever the dispatcher has queued.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::calculate_backoff;
use super::shared::Shared;
use crate::protocol::FrameParser;
use crate::transport::{Connector, Link};

const READ_CHUNK: usize = 256;

/// Why a link's read loop ended.
#[derive(Debug)]
enum LinkEnd {
    Cancelled,
    Closed,
    Failed(String),
}

pub(crate) async fn run(
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    cancel: CancellationToken,
) {
    let reconnect = shared.config().reconnect.clone();
    let mut parser = FrameParser::with_capacity(shared.config().ring_capacity);
    let mut failures: u32 = 0;
    info!(endpoint = %shared.endpoint(), "Link supervisor started");

    loop {
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = connector.connect() => result,
        };

        let delay = match connected {
            Ok(link) => {
                failures = 0;
                parser.reset();
                match run_link(&shared, link, &mut parser, &cancel).await {
                    LinkEnd::Cancelled if cancel.is_cancelled() => break,
                    LinkEnd::Cancelled => debug!("Link replaced"),
                    LinkEnd::Closed => shared.request_reconnect("stream ended"),
                    LinkEnd::Failed(reason) => shared.request_reconnect(&reason),
                }
                calculate_backoff(0, &reconnect)
            }
            Err(e) => {
                warn!(error = %e, attempt = failures, "Connect failed");
                if let Some(max) = reconnect.max_retries
                    && failures >= max
                {
                    error!(max_retries = max, "Reconnection limit reached, giving up");
                    break;
                }
                let delay = calculate_backoff(failures, &reconnect);
                failures = failures.saturating_add(1);
                delay
            }
        };

        info!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.with_monitor(|m| m.on_disconnected());
    info!("Link supervisor stopped");
}

/// Installs `link` and pumps its bytes into the read path until it ends.
async fn run_link(
    shared: &Shared,
    link: Link,
    parser: &mut FrameParser,
    cancel: &CancellationToken,
) -> LinkEnd {
    let Link { mut source, sink, description } = link;
    let token = cancel.child_token();
    shared.install_link(sink, token.clone()).await;
    info!(link = %description, "Link up");

    let mut buf = [0u8; READ_CHUNK];
    let end = loop {
        let read = tokio::select! {
            biased;
            _ = token.cancelled() => break LinkEnd::Cancelled,
            read = source.read_chunk(&mut buf) => read,
        };
        match read {
            Ok(0) => break LinkEnd::Closed,
            Ok(n) => {
                shared.on_bytes();
                for frame in parser.feed(&buf[..n]) {
                    shared.handle_frame(frame);
                }
                shared.set_parser_stats(parser.stats());
            }
            Err(e) => break LinkEnd::Failed(e.to_string()),
        }
    };

    debug!(link = %description, ?end, buffered = parser.buffered(), "Link down");
    token.cancel();
    shared.remove_link().await;
    end
}
