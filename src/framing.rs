//! Frame assembly: turning arbitrary byte chunks into fixed-size record blocks
//!
//! Transport chunk boundaries carry no meaning. The assembler copies each chunk
//! into a rolling buffer and hands out complete `record_size` blocks from the
//! head in arrival order. A trailing partial record stays buffered until more
//! bytes arrive.
//!
//! The buffer never holds more than the configured limit. A chunk larger than
//! the free space is taken in slices, with complete records handed out between
//! slices, so one message carrying many records is framed without loss.
//!
//! There are no magic bytes, length prefixes or checksums to resynchronise on.
//! If the configured record size does not match the device cadence the framing
//! drifts permanently. The limit fails with [`StreamError::FramingOverflow`]
//! when it fills up without a record completing.
//!
//! ```rust
//! use ascan_stream::framing::FrameAssembler;
//! use ascan_stream::types::RecordShape;
//!
//! let shape = RecordShape::new(4).unwrap(); // 36-byte records
//! let mut assembler = FrameAssembler::new(shape, 2);
//!
//! // 10 records plus 14 bytes of the next one, more than the 72-byte limit
//! let chunk = vec![0u8; 10 * 36 + 14];
//! let records: Vec<_> = assembler.feed(&chunk).collect::<Result<_, _>>().unwrap();
//! assert_eq!(records.len(), 10);
//! assert_eq!(assembler.buffered(), 14);
//! ```

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::types::RecordShape;
use crate::{Result, StreamError};

/// Rolling buffer that extracts complete records from a byte stream.
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: BytesMut,
    record_size: usize,
    max_buffered: usize,
}

impl FrameAssembler {
    /// Create an assembler that holds at most `max_buffered_records` worth of
    /// bytes at a time.
    pub fn new(shape: RecordShape, max_buffered_records: usize) -> Self {
        let record_size = shape.record_size();
        Self::with_limit(record_size, record_size.saturating_mul(max_buffered_records.max(1)))
    }

    /// Create an assembler with an explicit byte limit.
    ///
    /// A limit below `record_size` means no record can ever complete; the
    /// first `max_buffered + 1` bytes fail with an overflow.
    pub fn with_limit(record_size: usize, max_buffered: usize) -> Self {
        debug_assert!(record_size > 0);
        let max_buffered = max_buffered.max(1);
        Self {
            buffer: BytesMut::with_capacity(record_size.min(max_buffered) * 2),
            record_size,
            max_buffered,
        }
    }

    /// Copy as much of `chunk` as fits under the limit.
    ///
    /// Returns the number of bytes taken; the caller takes complete records
    /// out with [`FrameAssembler::next_record`] and offers the rest again.
    /// Fails when the buffer is full and still holds no complete record.
    pub fn push(&mut self, chunk: &[u8]) -> Result<usize> {
        if chunk.is_empty() {
            return Ok(0);
        }

        let room = self.max_buffered - self.buffer.len();
        if room == 0 {
            if self.buffer.len() >= self.record_size {
                return Ok(0);
            }
            let pending = self.buffer.len() + chunk.len();
            debug!(
                pending,
                limit = self.max_buffered,
                record_size = self.record_size,
                "Framing bound exceeded without a complete record"
            );
            return Err(StreamError::FramingOverflow {
                buffered: pending,
                limit: self.max_buffered,
                record_size: self.record_size,
            });
        }

        let taken = room.min(chunk.len());
        self.buffer.extend_from_slice(&chunk[..taken]);
        trace!(taken, offered = chunk.len(), buffered = self.buffer.len(), "Chunk appended");
        Ok(taken)
    }

    /// Frame a whole chunk, yielding each record as soon as it completes.
    ///
    /// Stops after the first error.
    pub fn feed<'a>(&'a mut self, chunk: &'a [u8]) -> Feed<'a> {
        Feed { assembler: self, rest: chunk }
    }

    /// Take the next complete record from the head of the buffer, if any.
    pub fn next_record(&mut self) -> Option<Bytes> {
        if self.buffer.len() < self.record_size {
            return None;
        }
        Some(self.buffer.split_to(self.record_size).freeze())
    }

    /// Iterate over every complete record currently buffered.
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { assembler: self }
    }

    /// Bytes waiting for the rest of their record.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn limit(&self) -> usize {
        self.max_buffered
    }

    /// Discard any partial record. Returns the number of bytes dropped.
    ///
    /// Only used when a new connection starts; a partial frame from a previous
    /// connection can never be completed.
    pub fn reset(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        if dropped > 0 {
            debug!(dropped, "Discarded partial record on framing reset");
        }
        dropped
    }
}

/// Iterator returned by [`FrameAssembler::drain`].
pub struct Drain<'a> {
    assembler: &'a mut FrameAssembler,
}

impl Iterator for Drain<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        self.assembler.next_record()
    }
}

/// Iterator returned by [`FrameAssembler::feed`].
pub struct Feed<'a> {
    assembler: &'a mut FrameAssembler,
    rest: &'a [u8],
}

impl Feed<'_> {
    /// Bytes of the chunk not yet copied into the buffer.
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }
}

impl Iterator for Feed<'_> {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.assembler.next_record() {
                return Some(Ok(record));
            }
            if self.rest.is_empty() {
                return None;
            }
            // No complete record is buffered here, so push either makes
            // progress or reports an overflow.
            match self.assembler.push(self.rest) {
                Ok(taken) => self.rest = &self.rest[taken..],
                Err(error) => {
                    self.rest = &[];
                    return Some(Err(error));
                }
            }
        }
    }
}
