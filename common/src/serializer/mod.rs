//! Byte-level wire codec shared by blocks and transactions.
//!
//! Fixed-width integers are little-endian on the wire. Variable-length
//! counts use CompactSize:
//!
//! ```text
//! value < 0xfd          -> [value]
//! value <= 0xffff       -> [0xfd, u16 LE]
//! value <= 0xffff_ffff  -> [0xfe, u32 LE]
//! otherwise             -> [0xff, u64 LE]
//! ```

mod reader;
mod writer;

pub use reader::{Reader, ReaderError};
pub use writer::Writer;

/// Types with a byte-exact wire representation.
pub trait Serializer: Sized {
    fn write(&self, writer: &mut Writer);

    fn read(reader: &mut Reader) -> Result<Self, ReaderError>;

    fn size(&self) -> usize;

    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::with_capacity(self.size());
        self.write(&mut writer);
        writer.into_bytes()
    }

    fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Decode a value that must span the whole buffer.
    fn from_bytes(bytes: &[u8]) -> Result<Self, ReaderError> {
        let mut reader = Reader::new(bytes);
        let value = Self::read(&mut reader)?;
        if !reader.is_empty() {
            return Err(ReaderError::TrailingBytes(reader.remaining()));
        }
        Ok(value)
    }

    fn from_hex(hex: &str) -> Result<Self, ReaderError> {
        let bytes = hex::decode(hex).map_err(|_| ReaderError::InvalidHex)?;
        Self::from_bytes(&bytes)
    }
}

/// Number of bytes `value` takes once CompactSize-encoded.
pub fn compact_size_len(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode_compact(value: u64) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.write_compact_size(value);
        writer.into_bytes()
    }

    #[test]
    fn test_compact_size_boundaries() {
        assert_eq!(encode_compact(0xfc), vec![0xfc]);
        assert_eq!(encode_compact(0xfd), vec![0xfd, 0xfd, 0x00]);
        assert_eq!(encode_compact(0xffff), vec![0xfd, 0xff, 0xff]);
        assert_eq!(encode_compact(0x1_0000), vec![0xfe, 0x00, 0x00, 0x01, 0x00]);
        assert_eq!(
            encode_compact(0xffff_ffff),
            vec![0xfe, 0xff, 0xff, 0xff, 0xff]
        );
        assert_eq!(
            encode_compact(0x1_0000_0000),
            vec![0xff, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_compact_size_len_matches_encoding() {
        for value in [0, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff, u64::MAX] {
            assert_eq!(compact_size_len(value), encode_compact(value).len());
        }
    }

    #[test]
    fn test_storage_context_captures_raw_range() {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x05];
        let mut reader = Reader::new(&bytes);
        reader.read_u8().unwrap();
        reader.push_storage_context();
        reader.read_u16().unwrap();
        reader.push_storage_context();
        reader.read_u8().unwrap();
        assert_eq!(reader.pop_storage_context().unwrap(), vec![0x04]);
        assert_eq!(reader.pop_storage_context().unwrap(), vec![0x02, 0x03, 0x04]);
        assert!(matches!(
            reader.pop_storage_context(),
            Err(ReaderError::NoStorageContext)
        ));
    }

    #[test]
    fn test_swapped_read() {
        let bytes = [0xaa, 0xbb, 0xcc];
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.read_swapped(3).unwrap(), vec![0xcc, 0xbb, 0xaa]);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_read_past_end() {
        let bytes = [0xfe, 0x01, 0x02];
        let mut reader = Reader::new(&bytes);
        assert!(matches!(
            reader.read_compact_size(),
            Err(ReaderError::InvalidSize)
        ));
    }

    #[test]
    fn test_fixed_width_little_endian() {
        let mut writer = Writer::new();
        writer.write_u32(0x0102_0304);
        writer.write_u64(1);
        let bytes = writer.into_bytes();
        assert_eq!(&bytes[..4], &[0x04, 0x03, 0x02, 0x01]);

        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.read_uint(4).unwrap(), 0x0102_0304);
        assert_eq!(reader.read_u64().unwrap(), 1);
    }

    proptest! {
        #[test]
        fn prop_compact_size_roundtrip(value in any::<u64>()) {
            let bytes = encode_compact(value);
            let mut reader = Reader::new(&bytes);
            prop_assert_eq!(reader.read_compact_size().unwrap(), value);
            prop_assert!(reader.is_empty());
        }
    }
}
