//! Connects to a wallpad gateway and logs every state change.
//!
//! Usage: `kocom-monitor [CONFIG.yaml]`. Without a path the defaults are used
//! (gateway at 127.0.0.1:8899). Set `RUST_LOG` to adjust verbosity.

use anyhow::Context;
use futures::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kocom_wallpad::{Config, Wallpad};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("kocom_wallpad=info,kocom_monitor=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let config = match std::env::args_os().nth(1) {
        Some(path) => Config::load(&path)
            .with_context(|| format!("loading {}", path.to_string_lossy()))?,
        None => Config::default(),
    };
    info!(host = %config.transport.host, port = config.transport.port, "Starting monitor");

    let gateway = Wallpad::connect(config).await.context("starting gateway")?;
    let mut updates = gateway.updates();
    let mut state = gateway.connection_state();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                info!(state = %*state.borrow_and_update(), "Connection state");
            }
            change = updates.next() => match change {
                Some(change) => info!(
                    key = %change.state.key,
                    kind = ?change.kind,
                    attrs = ?change.state.attrs,
                    "Device update"
                ),
                None => break,
            },
        }
    }

    match gateway.diagnostics().to_yaml() {
        Ok(report) => println!("{report}"),
        Err(e) => warn!("Cannot render diagnostics: {}", e),
    }
    gateway.shutdown().await;
    Ok(())
}
