//! Streaming client for fixed-shape A-scan measurement records.
//!
//! An ultrasonic instrument streams A-scan records over a WebSocket or a raw
//! TCP data port. Each record is a 28-byte header followed by `sample_count`
//! signed 16-bit samples. Transport payloads do not line up with record
//! boundaries, so this crate reassembles the byte stream into records, decodes
//! them and hands them to application handlers in arrival order.
//!
//! # Pipeline
//!
//! ```text
//! Transport -> FrameAssembler -> RecordDecoder -> Dispatcher -> handler
//! ```
//!
//! A [`Session`] drives the pipeline on one receive loop and owns the
//! connection lifecycle: connect, stream, reconnect on transport errors,
//! disconnect.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ascan_stream::{AScan, Record, SessionConfig, SessionOutcome};
//!
//! #[tokio::main]
//! async fn main() -> ascan_stream::Result<()> {
//!     // Read ascan_length from the device first; it must match.
//!     let config = SessionConfig::tcp("192.168.200.18:2758", 2048);
//!
//!     let mut session = AScan::connect(config, |record: &Record| {
//!         println!("record {}: {} samples", record.sequence(), record.len());
//!         Ok(())
//!     })
//!     .await?;
//!
//!     match session.wait().await {
//!         Some(SessionOutcome::Failed(error)) => eprintln!("stream failed: {error}"),
//!         _ => println!("stream closed"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! The client does not configure or start the device. Setting the record
//! length and starting acquisition happen through the device's own API before
//! a session connects.

// Core types and error handling
pub mod config;
mod error;
pub mod stats;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Stream pipeline
pub mod decoder;
pub mod dispatch;
mod driver;
pub mod framing;
pub mod session;

// Byte sources
pub mod transport;
pub mod transports;

pub use config::{CallbackPolicy, ReconnectPolicy, SessionConfig, TransportKind};
pub use dispatch::RecordHandler;
pub use error::*;
pub use session::{DisconnectHandle, Session};
pub use stats::StatsSnapshot;
pub use types::{
    ByteOrder, Record, RecordHeader, RecordShape, SessionEvent, SessionOutcome, SessionState,
};

/// Entry point for A-scan streaming sessions.
pub struct AScan;

impl AScan {
    /// Build a session, register `handler` and start streaming.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Configuration`] if `config` is invalid. Connection
    /// failures are reported by the session, not here.
    pub async fn connect<F>(config: SessionConfig, handler: F) -> Result<Session>
    where
        F: Fn(&Record) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        let mut session = Session::new(config)?;
        session.on_record(handler);
        session.connect().await?;
        Ok(session)
    }
}
