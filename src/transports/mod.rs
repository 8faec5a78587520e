//! Transport implementations

pub mod tcp;
pub mod websocket;

pub use tcp::{TcpConnector, TcpTransport};
pub use websocket::{WebSocketConnector, WebSocketTransport};
