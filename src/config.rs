//! Session configuration
//!
//! A [`SessionConfig`] carries everything needed to open a stream: endpoint,
//! transport variant, record shape and the optional reconnect and timeout
//! policies. It can be built in code or loaded from YAML:
//!
//! ```rust
//! use ascan_stream::SessionConfig;
//!
//! let config = SessionConfig::from_yaml_str(
//!     r#"
//! endpoint: "ws://192.168.200.18:80"
//! transport: websocket
//! sample_count: 2048
//! reconnect:
//!   enabled: true
//!   max_attempts: 5
//! "#,
//! )
//! .unwrap();
//! assert_eq!(config.shape().unwrap().record_size(), 28 + 2048 * 2);
//! ```
//!
//! `sample_count` must be read from the device (`ascan_length`) beforehand.
//! The client never queries it itself.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::types::{ByteOrder, RecordShape};
use crate::{Result, StreamError};

/// Default WebSocket subprotocol announced by the A-scan server.
pub const DEFAULT_SUBPROTOCOL: &str = "server-websocket";

const DEFAULT_MAX_BUFFERED_RECORDS: u32 = 8;
const MIN_MAX_BUFFERED_RECORDS: u32 = 2;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Which byte-stream transport carries the records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// One binary WebSocket message per chunk
    #[serde(alias = "ws")]
    WebSocket,
    /// Raw TCP data port
    #[serde(alias = "raw", alias = "socket")]
    Tcp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::WebSocket => f.write_str("websocket"),
            TransportKind::Tcp => f.write_str("tcp"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(TransportKind::WebSocket),
            "tcp" | "raw" | "socket" => Ok(TransportKind::Tcp),
            other => Err(StreamError::configuration(
                "transport",
                format!("unsupported transport variant '{other}'"),
            )),
        }
    }
}

/// What the receive loop does when a record handler fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackPolicy {
    /// Report a callback error event and keep streaming
    #[default]
    Continue,
    /// Fail the session
    Fatal,
}

/// Reconnect behaviour after transport errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    /// Connect attempts allowed after a failure before the session fails
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Enabled policy with the default backoff schedule.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self { enabled: true, max_attempts, ..Self::default() }
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    ///
    /// Exponential: `initial * multiplier^(attempt - 1)`, capped at
    /// `max_backoff_ms`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    fn validate(&self) -> Result<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(StreamError::configuration(
                "reconnect.multiplier",
                "must be a finite number >= 1.0",
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(StreamError::configuration(
                "reconnect.initial_backoff_ms",
                "cannot exceed max_backoff_ms",
            ));
        }
        if self.enabled && self.max_attempts == 0 {
            return Err(StreamError::configuration(
                "reconnect.max_attempts",
                "must be at least 1 when reconnect is enabled",
            ));
        }
        Ok(())
    }
}

/// Parameters for one streaming session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// `ws://host:port` for WebSocket, `host:port` for TCP
    pub endpoint: String,
    pub transport: TransportKind,
    /// Samples per record; must equal the device's `ascan_length`
    pub sample_count: u32,
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Framing buffer bound expressed in records
    #[serde(default = "default_max_buffered_records")]
    pub max_buffered_records: u32,
    /// Hard byte cap on the framing buffer, replacing the records-based bound.
    ///
    /// Set it to the largest record the device can send. If `sample_count`
    /// describes a bigger record, none can complete and the session fails with
    /// a framing overflow once the cap fills.
    #[serde(default)]
    pub max_buffered_bytes: Option<u64>,
    #[serde(default)]
    pub receive_timeout_ms: Option<u64>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_subprotocol")]
    pub subprotocol: Option<String>,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    #[serde(default)]
    pub callback_policy: CallbackPolicy,
}

fn default_max_buffered_records() -> u32 {
    DEFAULT_MAX_BUFFERED_RECORDS
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_subprotocol() -> Option<String> {
    Some(DEFAULT_SUBPROTOCOL.to_string())
}

impl SessionConfig {
    pub fn new(endpoint: impl Into<String>, transport: TransportKind, sample_count: u32) -> Self {
        Self {
            endpoint: endpoint.into(),
            transport,
            sample_count,
            byte_order: ByteOrder::default(),
            max_buffered_records: DEFAULT_MAX_BUFFERED_RECORDS,
            max_buffered_bytes: None,
            receive_timeout_ms: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            subprotocol: default_subprotocol(),
            reconnect: ReconnectPolicy::default(),
            callback_policy: CallbackPolicy::default(),
        }
    }

    pub fn websocket(url: impl Into<String>, sample_count: u32) -> Self {
        Self::new(url, TransportKind::WebSocket, sample_count)
    }

    pub fn tcp(address: impl Into<String>, sample_count: u32) -> Self {
        Self::new(address, TransportKind::Tcp, sample_count)
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn with_max_buffered_records(mut self, records: u32) -> Self {
        self.max_buffered_records = records;
        self
    }

    pub fn with_max_buffered_bytes(mut self, bytes: u64) -> Self {
        self.max_buffered_bytes = Some(bytes);
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_subprotocol(mut self, subprotocol: Option<String>) -> Self {
        self.subprotocol = subprotocol;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_callback_policy(mut self, policy: CallbackPolicy) -> Self {
        self.callback_policy = policy;
        self
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: SessionConfig = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StreamError::configuration(path.display().to_string(), format!("unreadable: {e}"))
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    pub fn shape(&self) -> Result<RecordShape> {
        RecordShape::new(self.sample_count)
    }

    /// Byte limit of the framing buffer.
    pub fn framing_limit(&self) -> Result<usize> {
        match self.max_buffered_bytes {
            Some(bytes) => usize::try_from(bytes).map_err(|_| {
                StreamError::configuration("max_buffered_bytes", "exceeds addressable memory")
            }),
            None => {
                let records = self.max_buffered_records as usize;
                Ok(self.shape()?.record_size().saturating_mul(records))
            }
        }
    }

    pub fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Check every parameter before any connection attempt.
    pub fn validate(&self) -> Result<()> {
        self.shape()?;

        if self.max_buffered_records < MIN_MAX_BUFFERED_RECORDS {
            return Err(StreamError::configuration(
                "max_buffered_records",
                format!("must be at least {MIN_MAX_BUFFERED_RECORDS}"),
            ));
        }
        if self.max_buffered_bytes == Some(0) {
            return Err(StreamError::configuration(
                "max_buffered_bytes",
                "must be positive when set",
            ));
        }
        self.framing_limit()?;
        if self.receive_timeout_ms == Some(0) {
            return Err(StreamError::configuration(
                "receive_timeout_ms",
                "must be positive when set",
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(StreamError::configuration("connect_timeout_ms", "must be positive"));
        }
        if let Some(subprotocol) = &self.subprotocol {
            if subprotocol.is_empty() || !subprotocol.is_ascii() {
                return Err(StreamError::configuration(
                    "subprotocol",
                    "must be a non-empty ASCII token",
                ));
            }
        }
        self.reconnect.validate()?;

        match self.transport {
            TransportKind::WebSocket => validate_websocket_url(&self.endpoint),
            TransportKind::Tcp => validate_socket_address(&self.endpoint),
        }
    }
}

fn validate_websocket_url(endpoint: &str) -> Result<()> {
    let url = Url::parse(endpoint)
        .map_err(|e| StreamError::configuration("endpoint", format!("invalid URL: {e}")))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(StreamError::configuration(
            "endpoint",
            format!("WebSocket URL must use ws:// or wss://, got {}://", url.scheme()),
        ));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(StreamError::configuration("endpoint", "WebSocket URL has no host"));
    }
    Ok(())
}

fn validate_socket_address(endpoint: &str) -> Result<()> {
    let Some((host, port)) = endpoint.rsplit_once(':') else {
        return Err(StreamError::configuration("endpoint", "TCP endpoint must be host:port"));
    };
    if host.trim_matches(['[', ']']).is_empty() {
        return Err(StreamError::configuration("endpoint", "TCP endpoint has no host"));
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(StreamError::configuration(
            "endpoint",
            format!("'{port}' is not a valid TCP port"),
        )),
        Ok(_) => Ok(()),
    }
}
