//! Protocol engine and connection supervisor for the Kocom wallpad RS485 bus.
//!
//! Kocom apartment wallpads talk to lights, outlets, thermostats, air
//! conditioners, ventilation, the gas valve and the elevator over a shared
//! RS485 line. This crate sits behind an RS485-to-TCP gateway and turns that
//! line into typed device state and confirmed commands.
//!
//! # Features
//!
//! - **Framing**: resynchronizing parser over a bounded ring buffer
//! - **Codec**: every device family decoded into attribute events
//! - **State**: a registry keyed by device with change notifications
//! - **Commands**: full-state frames built from known state, retried until
//!   the device confirms
//! - **Supervision**: reconnect with backoff, sparse heartbeat, availability
//!   inferred from receive silence
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use kocom_wallpad::{Command, DeviceKey, DeviceType, Wallpad};
//! use futures::StreamExt;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> kocom_wallpad::Result<()> {
//!     let gateway = Wallpad::open("wallpad.yaml").await?;
//!
//!     let living_room = DeviceKey::new(DeviceType::Light, 0).with_index(1);
//!     let state = gateway.send(Command::turn_on(living_room)).await?;
//!     println!("confirmed: {:?}", state.power());
//!
//!     let mut updates = gateway.updates();
//!     while let Some(change) = updates.next().await {
//!         println!("{} -> {:?}", change.state.key, change.state.attrs);
//!     }
//!     Ok(())
//! }
//! ```

// Protocol core
pub mod builder;
mod error;
pub mod protocol;
pub mod registry;
pub mod types;

// Runtime
pub mod config;
pub mod gateway;
pub mod stream;
pub mod transport;

#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;

// Core exports
pub use error::*;
pub use types::*;

pub use builder::{CommandBuilder, CommandPlan};
pub use protocol::{Control, Frame, FrameParser, PacketCodec, ParserStats, RingBuffer};
pub use registry::{DeviceStateRegistry, SavedState, UpdateOutcome};

// Runtime exports
pub use config::{Config, DiscoveryTarget, GatewayConfig};
pub use gateway::{ConnectionState, Diagnostics, DiscoveryOutcome, Gateway, ReconnectConfig};
pub use stream::StateUpdates;
pub use transport::{Connector, Link, TcpConfig, TcpConnector};

/// Entry point for connecting to a wallpad bus.
///
/// # Examples
///
/// ## From a configuration file
/// ```rust,no_run
/// use kocom_wallpad::Wallpad;
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() -> kocom_wallpad::Result<()> {
///     let gateway = Wallpad::open("wallpad.yaml").await?;
///     // Use gateway...
///     gateway.shutdown().await;
///     Ok(())
/// }
/// ```
///
/// ## With explicit settings
/// ```rust,no_run
/// use kocom_wallpad::{Config, TcpConfig, Wallpad};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() -> kocom_wallpad::Result<()> {
///     let config = Config {
///         transport: TcpConfig { host: "192.168.0.200".into(), ..TcpConfig::default() },
///         ..Config::default()
///     };
///     let gateway = Wallpad::connect(config).await?;
///     # gateway.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct Wallpad;

impl Wallpad {
    /// Starts a gateway against the TCP endpoint in `config`.
    ///
    /// Returns as soon as the background tasks are running. The first link
    /// comes up asynchronously; watch
    /// [`Gateway::connection_state`] to wait for it.
    ///
    /// # Errors
    ///
    /// Returns [`WallpadError::Config`] if the gateway settings are invalid.
    pub async fn connect(config: Config) -> Result<Gateway> {
        Gateway::spawn(config.gateway, TcpConnector::new(config.transport))
    }

    /// Loads a YAML configuration file and connects with it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not parse, or
    /// fails validation.
    pub async fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Gateway> {
        Self::connect(Config::load(path)?).await
    }

    /// Starts a gateway over a custom transport.
    ///
    /// ```rust,no_run
    /// use kocom_wallpad::{GatewayConfig, TcpConfig, TcpConnector, Wallpad};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> kocom_wallpad::Result<()> {
    /// let connector = TcpConnector::new(TcpConfig::default());
    /// let gateway = Wallpad::with_connector(GatewayConfig::default(), connector).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_connector(
        config: GatewayConfig,
        connector: impl Connector,
    ) -> Result<Gateway> {
        Gateway::spawn(config, connector)
    }
}
