//! TCP transport for RS485-to-Ethernet adapters.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info};

use super::{ByteSink, ByteSource, Connector, Link};
use crate::{Result, WallpadError};

/// Default port of common RS485 serial servers.
pub const DEFAULT_PORT: u16 = 8899;

/// Where and how to reach the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: DEFAULT_PORT, connect_timeout_ms: 5_000 }
    }
}

impl TcpConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Opens a fresh TCP connection for every link.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    config: TcpConfig,
}

impl TcpConnector {
    pub fn new(config: TcpConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Link> {
        let address = self.config.address();
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        debug!(%address, ?timeout, "Opening TCP link");

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(WallpadError::transport_with_source(
                    format!("connect to {address} failed"),
                    Box::new(e),
                ));
            }
            Err(_) => return Err(WallpadError::Timeout { duration: timeout }),
        };
        stream.set_nodelay(true)?;
        info!(%address, "TCP link established");

        let (read, write) = stream.into_split();
        Ok(Link::new(TcpSource(read), TcpSink(write), address))
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.config.address())
    }
}

struct TcpSource(OwnedReadHalf);

#[async_trait::async_trait]
impl ByteSource for TcpSource {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.0.read(buf).await?)
    }
}

struct TcpSink(OwnedWriteHalf);

#[async_trait::async_trait]
impl ByteSink for TcpSink {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.0.write_all(bytes).await?;
        Ok(self.0.flush().await?)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(self.0.shutdown().await?)
    }
}
