use crate::{
    config::BLOCK_HEADER_SIZE,
    crypto::{hash256, Hash, HASH_SIZE},
    serializer::{Reader, ReaderError, Serializer, Writer},
};
use serde::{Deserialize, Serialize};

// Byte offsets inside the serialized header
pub const TIMESTAMP_OFFSET: usize = 68;
pub const NONCE_OFFSET: usize = 76;

/// Fixed 80-byte block header.
///
/// ```text
/// version(4) | prev_block(32) | merkle_root(32) | timestamp(4) | bits(4) | nonce(4)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn new(
        version: u32,
        prev_block: Hash,
        merkle_root: Hash,
        timestamp: u32,
        bits: u32,
        nonce: u32,
    ) -> Self {
        Self {
            version,
            prev_block,
            merkle_root,
            timestamp,
            bits,
            nonce,
        }
    }

    pub fn hash(&self) -> Hash {
        hash256(&self.to_bytes())
    }

    // Block hash as displayed by the node
    pub fn block_hash(&self) -> String {
        self.hash().to_display_hex()
    }

    /// Expand the compact `bits` encoding into a 256-bit target in wire
    /// byte order, suitable for [`Hash::cmp_reversed`].
    /// Returns `None` for negative or overflowing encodings.
    pub fn target(&self) -> Option<Hash> {
        let exponent = (self.bits >> 24) as usize;
        let mantissa = self.bits & 0x007f_ffff;
        if self.bits & 0x0080_0000 != 0 && mantissa != 0 {
            return None;
        }

        let mut bytes = [0u8; HASH_SIZE];
        let mantissa_bytes = mantissa.to_le_bytes();
        for (i, byte) in mantissa_bytes.iter().take(3).enumerate() {
            // Byte i of the mantissa lands at position exponent - 3 + i
            let position = (exponent + i).checked_sub(3);
            match position {
                Some(p) if p < HASH_SIZE => bytes[p] = *byte,
                Some(_) if *byte != 0 => return None,
                _ => {}
            }
        }
        Some(Hash::new(bytes))
    }
}

impl Serializer for BlockHeader {
    fn write(&self, writer: &mut Writer) {
        writer.write_u32(self.version);
        writer.write_hash(&self.prev_block);
        writer.write_hash(&self.merkle_root);
        writer.write_u32(self.timestamp);
        writer.write_u32(self.bits);
        writer.write_u32(self.nonce);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            version: reader.read_u32()?,
            prev_block: reader.read_hash()?,
            merkle_root: reader.read_hash()?,
            timestamp: reader.read_u32()?,
            bits: reader.read_u32()?,
            nonce: reader.read_u32()?,
        })
    }

    fn size(&self) -> usize {
        BLOCK_HEADER_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> BlockHeader {
        BlockHeader::new(
            0x2000_0000,
            Hash::new([1u8; 32]),
            Hash::new([2u8; 32]),
            1_600_000_000,
            0x207f_ffff,
            42,
        )
    }

    #[test]
    fn test_header_is_80_bytes() {
        let bytes = header().to_bytes();
        assert_eq!(bytes.len(), BLOCK_HEADER_SIZE);
        assert_eq!(&bytes[NONCE_OFFSET..], &42u32.to_le_bytes());
        assert_eq!(
            &bytes[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 4],
            &1_600_000_000u32.to_le_bytes()
        );
        assert_eq!(BlockHeader::from_bytes(&bytes).unwrap(), header());
    }

    #[test]
    fn test_short_header_rejected() {
        let bytes = header().to_bytes();
        assert_eq!(
            BlockHeader::from_bytes(&bytes[..79]),
            Err(ReaderError::InvalidSize)
        );
    }

    #[test]
    fn test_regtest_target() {
        // 0x207fffff: mantissa 7fffff shifted to the top three bytes
        let target = header().target().unwrap();
        let bytes = target.as_bytes();
        assert_eq!(bytes[31], 0x7f);
        assert_eq!(bytes[30], 0xff);
        assert_eq!(bytes[29], 0xff);
        assert!(bytes[..29].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_target_small_exponent() {
        let mut h = header();
        h.bits = 0x0300_1234;
        let target = h.target().unwrap();
        assert_eq!(&target.as_bytes()[..3], &[0x34, 0x12, 0x00]);

        h.bits = 0x0180_0001;
        assert_eq!(h.target(), None);
    }
}
