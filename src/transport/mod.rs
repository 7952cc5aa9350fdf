//! Byte-stream transport seam.
//!
//! The gateway never talks to sockets directly. A [`Connector`] produces a
//! [`Link`] (one connected source/sink pair) on demand, and the supervisor
//! asks for a fresh one whenever the previous link fails.

pub mod tcp;

pub use tcp::{TcpConfig, TcpConnector};

use crate::Result;

/// Read half of a link.
#[async_trait::async_trait]
pub trait ByteSource: Send + 'static {
    /// Reads the next chunk into `buf`.
    ///
    /// Returns:
    /// - `Ok(n)` with `n > 0` - bytes were read
    /// - `Ok(0)` - the stream ended
    /// - `Err(e)` - the link failed
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Write half of a link.
#[async_trait::async_trait]
pub trait ByteSink: Send + 'static {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Flushes and closes the write half. Errors are ignored by the supervisor.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One connected source/sink pair.
pub struct Link {
    pub source: Box<dyn ByteSource>,
    pub sink: Box<dyn ByteSink>,
    /// Peer description for logs, e.g. `192.168.0.20:8899`.
    pub description: String,
}

impl Link {
    pub fn new(
        source: impl ByteSource,
        sink: impl ByteSink,
        description: impl Into<String>,
    ) -> Self {
        Self { source: Box::new(source), sink: Box::new(sink), description: description.into() }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").field("description", &self.description).finish_non_exhaustive()
    }
}

/// Factory for links, called once per (re)connect.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Link>;

    /// Human-readable target for logs.
    fn describe(&self) -> String;
}
