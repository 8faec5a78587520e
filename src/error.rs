//! Error types for A-scan stream processing.
//!
//! Every failure the client can report is a [`StreamError`]. The variants map
//! onto four categories with different recovery behaviour:
//!
//! - **Transport**: connection resets, refused connections and receive
//!   timeouts. Recoverable through the session's reconnect policy.
//! - **Framing overflow**: the framing buffer filled up without a record
//!   completing. The record size does not match the device cadence, so the
//!   session moves to `Failed` and is never retried.
//! - **Callback**: a record handler returned an error or panicked. Non-fatal by
//!   default.
//! - **Configuration**: invalid session parameters, detected before any
//!   connection attempt.
//!
//! ```rust
//! use ascan_stream::StreamError;
//!
//! let error = StreamError::transport_failed("connection reset by peer");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

use crate::types::SessionState;

/// Result type alias for stream operations.
pub type Result<T, E = StreamError> = std::result::Result<T, E>;

/// Boxed error carried as the source of transport and callback failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for stream operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StreamError {
    #[error("Transport failure: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("No data received within {duration:?}")]
    Timeout { duration: Duration },

    #[error(
        "Framing overflow: {buffered} bytes without a complete record exceed limit of {limit} bytes (record size {record_size})"
    )]
    FramingOverflow { buffered: usize, limit: usize, record_size: usize },

    #[error("Record handler failed: {reason}")]
    Callback {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Invalid configuration for '{field}': {reason}")]
    Configuration { field: String, reason: String },

    #[error("Session is already {state}")]
    AlreadyActive { state: SessionState },
}

impl StreamError {
    /// Returns whether the reconnect policy may retry after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Transport { .. } => true,
            StreamError::Timeout { .. } => true,
            StreamError::FramingOverflow { .. } => false,
            StreamError::Callback { .. } => false,
            StreamError::Configuration { .. } => false,
            StreamError::AlreadyActive { .. } => false,
        }
    }

    /// Returns whether this error originated in the transport layer.
    pub fn is_transport(&self) -> bool {
        matches!(self, StreamError::Transport { .. } | StreamError::Timeout { .. })
    }

    /// Returns whether framing lost sync with the stream (usually a
    /// `sample_count` mismatch).
    pub fn is_fatal_framing(&self) -> bool {
        matches!(self, StreamError::FramingOverflow { .. })
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            StreamError::Transport { .. } => vec![
                "Check that the instrument is powered and reachable",
                "Verify the endpoint address and port",
                "Enable the reconnect policy for unstable links",
            ],
            StreamError::Timeout { .. } => vec![
                "Verify that acquisition has been started on the device",
                "Increase the receive timeout",
                "Check network latency to the instrument",
            ],
            StreamError::FramingOverflow { .. } => vec![
                "Read ascan_length from the device and use it as sample_count",
                "Restart acquisition after changing the record length",
                "Check that max_buffered_bytes is not below one record",
            ],
            StreamError::Callback { .. } => vec![
                "Inspect the record handler for failing logic",
                "Keep handlers fast and move heavy work off the receive loop",
            ],
            StreamError::Configuration { .. } => vec![
                "Correct the named configuration field",
                "Consult the device documentation for valid values",
            ],
            StreamError::AlreadyActive { .. } => vec![
                "Call disconnect() before connecting again",
                "Wait for the session to reach a terminal state",
            ],
        }
    }

    /// Helper constructor for transport errors.
    pub fn transport_failed(reason: impl Into<String>) -> Self {
        StreamError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport errors with source.
    pub fn transport_failed_with_source(reason: impl Into<String>, source: BoxError) -> Self {
        StreamError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for handler failures.
    pub fn callback_failed(reason: impl Into<String>, source: Option<BoxError>) -> Self {
        StreamError::Callback { reason: reason.into(), source }
    }

    /// Helper constructor for configuration errors.
    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        StreamError::Configuration { field: field.into(), reason: reason.into() }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Transport { reason: err.kind().to_string(), source: Some(Box::new(err)) }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for StreamError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        StreamError::Transport { reason: format!("WebSocket: {err}"), source: Some(Box::new(err)) }
    }
}

impl From<serde_yaml_ng::Error> for StreamError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        StreamError::Configuration { field: "<document>".to_string(), reason: err.to_string() }
    }
}
