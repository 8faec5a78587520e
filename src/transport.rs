//! Transport traits for byte-stream sources

use bytes::Bytes;
use std::sync::Arc;

use crate::config::{SessionConfig, TransportKind};
use crate::transports::{TcpConnector, WebSocketConnector};
use crate::Result;

/// An open connection producing raw byte chunks.
///
/// Chunk boundaries carry no meaning; the framing layer reassembles records
/// from whatever sizes arrive.
#[async_trait::async_trait]
pub trait Transport: Send + 'static {
    /// Wait for the next chunk of bytes.
    ///
    /// Returns:
    /// - `Ok(Some(chunk))` - bytes arrived
    /// - `Ok(None)` - the peer closed the connection
    /// - `Err(e)` - transport failure
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;

    /// Release the connection.
    async fn close(&mut self) -> Result<()>;
}

/// Opens fresh [`Transport`]s; called once per connect or reconnect attempt.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self) -> Result<Box<dyn Transport>>;

    /// Address used for logging and events.
    fn endpoint(&self) -> &str;
}

/// Build the connector named by `config.transport`.
pub fn connector_for(config: &SessionConfig) -> Result<Arc<dyn Connector>> {
    config.validate()?;
    let connector: Arc<dyn Connector> = match config.transport {
        TransportKind::WebSocket => Arc::new(WebSocketConnector::from_config(config)),
        TransportKind::Tcp => Arc::new(TcpConnector::from_config(config)?),
    };
    Ok(connector)
}
