//! Record shape, header and decoded record types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::{Result, StreamError};

// Size constants for the on-wire record
pub const HEADER_SIZE: usize = 28;
pub const SAMPLE_WIDTH: usize = 2;

/// Upper bound on samples per record; larger values indicate a corrupt setting.
pub const MAX_SAMPLE_COUNT: u32 = 1 << 20;

/// Packet start marker written by the firmware in the first four header bytes.
pub const EXPECTED_MAGIC: [u8; 4] = *b"FtH1";

/// Byte order of the 16-bit samples in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Device native order
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    /// Decode one sample from two payload bytes.
    #[inline]
    pub fn read_i16(self, bytes: [u8; 2]) -> i16 {
        match self {
            ByteOrder::Little => i16::from_le_bytes(bytes),
            ByteOrder::Big => i16::from_be_bytes(bytes),
        }
    }

    /// Encode one sample into two payload bytes.
    #[inline]
    pub fn write_i16(self, value: i16) -> [u8; 2] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }
}

/// Fixed size of every record in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordShape {
    sample_count: u32,
}

impl RecordShape {
    /// Create a shape for `sample_count` samples per record.
    ///
    /// `sample_count` must equal the device's configured `ascan_length`.
    pub fn new(sample_count: u32) -> Result<Self> {
        if sample_count == 0 {
            return Err(StreamError::configuration("sample_count", "must be greater than zero"));
        }
        if sample_count > MAX_SAMPLE_COUNT {
            return Err(StreamError::configuration(
                "sample_count",
                format!("{sample_count} is unreasonably large (limit {MAX_SAMPLE_COUNT})"),
            ));
        }
        Ok(Self { sample_count })
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count as usize
    }

    pub fn payload_size(&self) -> usize {
        self.sample_count() * SAMPLE_WIDTH
    }

    /// Total bytes per record: header plus payload.
    pub fn record_size(&self) -> usize {
        HEADER_SIZE + self.payload_size()
    }
}

/// The 28-byte record header.
///
/// The bytes are kept verbatim. Accessors follow the vendor-documented layout
/// (little-endian sub-fields) but nothing in this crate uses them to accept or
/// reject a record.
///
/// ```text
/// offset size field
/// 0      4    magic ("FtH1")
/// 4      12   ctp coordinates, 3 x u32
/// 16     3    declared length (u16 low word + u8 high byte)
/// 19     1    packet number
/// 20     3    telemetry bytes
/// 23     1    buffer full flag
/// 24     1    buffer fill level
/// 25     1    accumulated A-scan count
/// 26     2    reserved
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordHeader([u8; HEADER_SIZE]);

impl RecordHeader {
    pub fn from_bytes(bytes: [u8; HEADER_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HEADER_SIZE] {
        &self.0
    }

    pub fn magic(&self) -> [u8; 4] {
        [self.0[0], self.0[1], self.0[2], self.0[3]]
    }

    /// Informational only.
    pub fn has_expected_magic(&self) -> bool {
        self.magic() == EXPECTED_MAGIC
    }

    pub fn ctp(&self) -> [u32; 3] {
        [self.u32_at(4), self.u32_at(8), self.u32_at(12)]
    }

    /// 24-bit length announced by the firmware.
    pub fn declared_length(&self) -> u32 {
        let low = u16::from_le_bytes([self.0[16], self.0[17]]) as u32;
        let high = self.0[18] as u32;
        (high << 16) | low
    }

    pub fn packet_number(&self) -> u8 {
        self.0[19]
    }

    pub fn telemetry(&self) -> [u8; 3] {
        [self.0[20], self.0[21], self.0[22]]
    }

    pub fn is_full(&self) -> bool {
        self.0[23] != 0
    }

    pub fn buffer_fill(&self) -> u8 {
        self.0[24]
    }

    pub fn ascan_count(&self) -> u8 {
        self.0[25]
    }

    pub fn reserved(&self) -> [u8; 2] {
        [self.0[26], self.0[27]]
    }

    fn u32_at(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.0[offset],
            self.0[offset + 1],
            self.0[offset + 2],
            self.0[offset + 3],
        ])
    }
}

impl fmt::Debug for RecordHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordHeader")
            .field("magic", &String::from_utf8_lossy(&self.magic()))
            .field("packet_number", &self.packet_number())
            .field("declared_length", &self.declared_length())
            .field("raw", &self.0)
            .finish()
    }
}

/// One decoded A-scan record.
///
/// Immutable once built; cloning shares the sample buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    sequence: u64,
    header: RecordHeader,
    samples: Arc<[i16]>,
}

impl Record {
    pub fn new(sequence: u64, header: RecordHeader, samples: Vec<i16>) -> Self {
        Self { sequence, header, samples: samples.into() }
    }

    /// Zero-based position of this record in the session's stream.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn header(&self) -> &RecordHeader {
        &self.header
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
