//! Raw TCP transport
//!
//! Each successful socket read becomes one chunk of arbitrary size.

use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, trace};

use crate::config::SessionConfig;
use crate::transport::{Connector, Transport};
use crate::{Result, StreamError};

/// Opens TCP connections to an instrument's data port.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    read_capacity: usize,
    connect_timeout: Duration,
}

impl TcpConnector {
    /// `read_capacity` bounds a single read; one record size matches what the
    /// device writes per acquisition.
    pub fn new(address: impl Into<String>, read_capacity: usize, connect_timeout: Duration) -> Self {
        Self { address: address.into(), read_capacity: read_capacity.max(1), connect_timeout }
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let shape = config.shape()?;
        Ok(Self::new(config.endpoint.clone(), shape.record_size(), config.connect_timeout()))
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    async fn open(&self) -> Result<Box<dyn Transport>> {
        debug!(address = %self.address, "Opening TCP data connection");

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| StreamError::Timeout { duration: self.connect_timeout })?
            .map_err(|e| {
                StreamError::transport_failed_with_source(
                    format!("connect to {} failed", self.address),
                    Box::new(e),
                )
            })?;
        stream.set_nodelay(true)?;

        info!(address = %self.address, "TCP data connection established");

        Ok(Box::new(TcpTransport { stream, read_buf: vec![0u8; self.read_capacity] }))
    }

    fn endpoint(&self) -> &str {
        &self.address
    }
}

/// An open TCP data connection.
pub struct TcpTransport {
    stream: TcpStream,
    read_buf: Vec<u8>,
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let n = self.stream.read(&mut self.read_buf).await?;
        if n == 0 {
            debug!("TCP peer closed the data connection");
            return Ok(None);
        }
        trace!(len = n, "TCP read");
        Ok(Some(Bytes::copy_from_slice(&self.read_buf[..n])))
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
