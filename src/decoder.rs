//! Record decoding
//!
//! Splits one `record_size` block into the 28-byte header and the sample
//! payload. Decoding is pure and total: the framing layer guarantees the block
//! size, so there is no failure path.

use crate::types::{ByteOrder, HEADER_SIZE, Record, RecordHeader, RecordShape, SAMPLE_WIDTH};

/// Decodes framed blocks into [`Record`]s.
#[derive(Debug, Clone, Copy)]
pub struct RecordDecoder {
    shape: RecordShape,
    byte_order: ByteOrder,
}

impl RecordDecoder {
    pub fn new(shape: RecordShape, byte_order: ByteOrder) -> Self {
        Self { shape, byte_order }
    }

    pub fn shape(&self) -> RecordShape {
        self.shape
    }

    /// Decode one block produced by the frame assembler.
    pub fn decode(&self, sequence: u64, block: &[u8]) -> Record {
        debug_assert_eq!(block.len(), self.shape.record_size());

        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&block[..HEADER_SIZE]);

        let order = self.byte_order;
        let samples = block[HEADER_SIZE..]
            .chunks_exact(SAMPLE_WIDTH)
            .map(|pair| order.read_i16([pair[0], pair[1]]))
            .collect();

        Record::new(sequence, RecordHeader::from_bytes(header), samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::FrameAssembler;
    use crate::test_utils::encode_record;
    use proptest::prelude::*;

    #[test]
    fn decodes_nominal_record() {
        let shape = RecordShape::new(4).unwrap();
        let decoder = RecordDecoder::new(shape, ByteOrder::Little);
        let block = encode_record(&[0u8; HEADER_SIZE], &[100, -200, 300, -400], ByteOrder::Little);

        let record = decoder.decode(7, &block);
        assert_eq!(record.sequence(), 7);
        assert_eq!(record.samples(), &[100, -200, 300, -400]);
        assert_eq!(record.header().as_bytes(), &[0u8; HEADER_SIZE]);
    }

    #[test]
    fn honours_big_endian_payloads() {
        let shape = RecordShape::new(2).unwrap();
        let decoder = RecordDecoder::new(shape, ByteOrder::Big);
        let block = encode_record(&[0u8; HEADER_SIZE], &[0x0102, -2], ByteOrder::Big);
        assert_eq!(&block[HEADER_SIZE..HEADER_SIZE + 2], &[0x01, 0x02]);
        assert_eq!(decoder.decode(0, &block).samples(), &[0x0102, -2]);
    }

    #[test]
    fn unknown_header_contents_pass_through() {
        let shape = RecordShape::new(1).unwrap();
        let decoder = RecordDecoder::new(shape, ByteOrder::Little);
        let header = [0xFFu8; HEADER_SIZE];
        let record = decoder.decode(0, &encode_record(&header, &[5], ByteOrder::Little));
        assert!(!record.header().has_expected_magic());
        assert_eq!(record.header().as_bytes(), &header);
    }

    proptest! {
        #[test]
        fn assembled_record_reproduces_header_and_samples(
            header in prop::array::uniform28(any::<u8>()),
            samples in prop::collection::vec(any::<i16>(), 1..64),
            split in 1usize..200,
        ) {
            let shape = RecordShape::new(samples.len() as u32).unwrap();
            let decoder = RecordDecoder::new(shape, ByteOrder::Little);
            let block = encode_record(&header, &samples, ByteOrder::Little);

            let mut assembler = FrameAssembler::new(shape, 8);
            let split = split.min(block.len());
            assembler.push(&block[..split]).unwrap();
            assembler.push(&block[split..]).unwrap();
            let framed = assembler.next_record().unwrap();

            let record = decoder.decode(0, &framed);
            prop_assert_eq!(record.header().as_bytes(), &header);
            prop_assert_eq!(record.samples(), &samples[..]);
        }
    }
}
