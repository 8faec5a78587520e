//! Core types for A-scan record representation.
//!
//! - [`RecordShape`] fixes the byte size of every record in a session
//!   (28-byte header plus `sample_count` signed 16-bit samples).
//! - [`RecordHeader`] keeps the raw header bytes and exposes read-only
//!   accessors for the fields documented by the device firmware.
//! - [`Record`] is one decoded, immutable record handed to handlers.
//! - [`SessionState`], [`SessionEvent`] and [`SessionOutcome`] describe the
//!   connection lifecycle.
//!
//! ## Usage Example
//!
//! ```rust
//! use ascan_stream::types::{ByteOrder, RecordShape, HEADER_SIZE};
//!
//! let shape = RecordShape::new(2048).unwrap();
//! assert_eq!(shape.record_size(), HEADER_SIZE + 2048 * 2);
//! assert_eq!(ByteOrder::default(), ByteOrder::Little);
//! ```

mod event;
mod record;
mod state;

pub use event::SessionEvent;
pub use record::{
    ByteOrder, EXPECTED_MAGIC, HEADER_SIZE, MAX_SAMPLE_COUNT, Record, RecordHeader, RecordShape,
    SAMPLE_WIDTH,
};
pub use state::{SessionOutcome, SessionState};
