use crate::crypto::Hash;

#[derive(Default)]
pub struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    // Write bytes in reversed order
    pub fn write_swapped(&mut self, bytes: &[u8]) {
        self.bytes.extend(bytes.iter().rev());
    }

    pub fn write_hash(&mut self, hash: &Hash) {
        self.bytes.extend_from_slice(hash.as_bytes());
    }

    /// Little-endian unsigned integer truncated to `size` bytes (1..=8).
    pub fn write_uint(&mut self, size: usize, value: u64) {
        let size = size.clamp(1, 8);
        self.bytes.extend_from_slice(&value.to_le_bytes()[..size]);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_compact_size(&mut self, value: u64) {
        if value < 0xfd {
            self.write_u8(value as u8);
        } else if value <= 0xffff {
            self.write_u8(0xfd);
            self.write_u16(value as u16);
        } else if value <= 0xffff_ffff {
            self.write_u8(0xfe);
            self.write_u32(value as u32);
        } else {
            self.write_u8(0xff);
            self.write_u64(value);
        }
    }

    pub fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_compact_size(bytes.len() as u64);
        self.write_bytes(bytes);
    }

    pub fn total_write(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
