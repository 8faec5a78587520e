//! WebSocket transport
//!
//! Each inbound binary message becomes one chunk. Text messages and control
//! frames never reach the framing layer.

use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace};

use crate::config::SessionConfig;
use crate::transport::{Connector, Transport};
use crate::{Result, StreamError};

/// Opens WebSocket connections to an A-scan server.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    subprotocol: Option<String>,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>, subprotocol: Option<String>, connect_timeout: Duration) -> Self {
        Self { url: url.into(), subprotocol, connect_timeout }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.endpoint.clone(), config.subprotocol.clone(), config.connect_timeout())
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self) -> Result<Box<dyn Transport>> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| StreamError::configuration("endpoint", e.to_string()))?;

        if let Some(subprotocol) = &self.subprotocol {
            let value = HeaderValue::from_str(subprotocol)
                .map_err(|e| StreamError::configuration("subprotocol", e.to_string()))?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }

        debug!(url = %self.url, subprotocol = ?self.subprotocol, "Opening WebSocket");

        let (ws, response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| StreamError::Timeout { duration: self.connect_timeout })??;

        info!(url = %self.url, status = ?response.status(), "WebSocket connected");

        Ok(Box::new(WebSocketTransport { ws }))
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

/// An open WebSocket stream.
pub struct WebSocketTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Binary(data))) => {
                    trace!(len = data.len(), "Binary message");
                    return Ok(Some(Bytes::from(data)));
                }
                Some(Ok(Message::Text(text))) => {
                    debug!(len = text.len(), "Ignoring text message");
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(frame = ?frame, "WebSocket closed by server");
                    return Ok(None);
                }
                // Ping/pong replies are queued by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(tungstenite::Error::ConnectionClosed)) | None => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.ws.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
