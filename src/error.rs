//! Error types for the wallpad protocol engine.
//!
//! Every fallible operation in the crate returns [`WallpadError`]. Only a few
//! variants ever reach a caller of [`Gateway::send`](crate::Gateway::send):
//! command failures, queue rejection, invalid or unsupported commands, and
//! shutdown. Transport and framing faults are absorbed by the supervisor and
//! the parser. They show up in logs and through the availability signal.
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use kocom_wallpad::WallpadError;
//!
//! let error = WallpadError::transport("connection reset by peer");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

use crate::types::{DeviceKey, DeviceType};

/// Result type alias for wallpad operations.
pub type Result<T, E = WallpadError> = std::result::Result<T, E>;

/// Main error type for wallpad operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WallpadError {
    #[error("Transport failure: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Gateway link is not connected")]
    NotConnected,

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("No acknowledgement for {key} after {attempts} attempts")]
    CommandFailed { key: DeviceKey, attempts: u32 },

    #[error("Outbound queue is full ({capacity} pending commands)")]
    QueueFull { capacity: usize },

    #[error("Gateway has been stopped")]
    Stopped,

    #[error("{device} does not support this command: {reason}")]
    UnsupportedCommand { device: DeviceType, reason: String },

    #[error("Invalid value for {field}: {details}")]
    InvalidValue { field: String, details: String },

    #[error("Malformed frame: {details}")]
    MalformedFrame { details: String },

    #[error("Configuration error: {reason}")]
    Config {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WallpadError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            WallpadError::Transport { .. } => true,
            WallpadError::NotConnected => true,
            WallpadError::Timeout { .. } => true,
            WallpadError::CommandFailed { .. } => true,
            WallpadError::QueueFull { .. } => true,
            WallpadError::Io(_) => true,
            WallpadError::Stopped => false,
            WallpadError::UnsupportedCommand { .. } => false,
            WallpadError::InvalidValue { .. } => false,
            WallpadError::MalformedFrame { .. } => false,
            WallpadError::Config { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            WallpadError::Transport { .. } | WallpadError::Io(_) => vec![
                "Check that the RS485 gateway is powered and reachable",
                "Verify the configured host and port",
                "Wait for the supervisor to reconnect",
            ],
            WallpadError::NotConnected => vec![
                "Wait for the gateway link to come back",
                "Check the connection state before sending commands",
            ],
            WallpadError::Timeout { .. } => vec![
                "Increase the timeout duration",
                "Check for heavy bus traffic",
            ],
            WallpadError::CommandFailed { .. } => vec![
                "Check that the device is powered and wired to the bus",
                "Retry the command later",
                "Increase the acknowledgement timeout",
            ],
            WallpadError::QueueFull { .. } => vec![
                "Slow down command submission",
                "Increase the outbound queue capacity",
            ],
            WallpadError::Stopped => vec!["Create a new gateway"],
            WallpadError::UnsupportedCommand { .. } => vec![
                "Check which actions the device family accepts",
                "Sensors and the light cutoff switch are read-only",
            ],
            WallpadError::InvalidValue { .. } => vec![
                "Check the allowed range for the attribute",
                "Target temperatures must be between 5 and 40",
            ],
            WallpadError::MalformedFrame { .. } => vec![
                "Verify the frame is 21 bytes with AA55 prefix and 0D0D suffix",
                "Check the stored frame was not truncated",
            ],
            WallpadError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Compare the values against the documented defaults",
            ],
        }
    }

    /// Helper constructor for transport errors.
    pub fn transport(reason: impl Into<String>) -> Self {
        WallpadError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport errors with source.
    pub fn transport_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        WallpadError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for unsupported commands.
    pub fn unsupported(device: DeviceType, reason: impl Into<String>) -> Self {
        WallpadError::UnsupportedCommand { device, reason: reason.into() }
    }

    /// Helper constructor for out-of-range or mistyped attribute values.
    pub fn invalid_value(field: impl Into<String>, details: impl Into<String>) -> Self {
        WallpadError::InvalidValue { field: field.into(), details: details.into() }
    }

    /// Helper constructor for frame validation failures.
    pub fn malformed(details: impl Into<String>) -> Self {
        WallpadError::MalformedFrame { details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        WallpadError::Config { reason: reason.into(), source: None }
    }
}

impl From<serde_yaml_ng::Error> for WallpadError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        WallpadError::Config { reason: "invalid YAML".to_string(), source: Some(Box::new(err)) }
    }
}

impl From<hex::FromHexError> for WallpadError {
    fn from(err: hex::FromHexError) -> Self {
        WallpadError::MalformedFrame { details: format!("invalid hex: {err}") }
    }
}
