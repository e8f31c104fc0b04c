use crate::crypto::{Hash, HASH_SIZE};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReaderError {
    #[error("Invalid size")]
    InvalidSize,
    #[error("Invalid value")]
    InvalidValue,
    #[error("Invalid hex string")]
    InvalidHex,
    #[error("{} trailing bytes after value", _0)]
    TrailingBytes(usize),
    #[error("No storage context to pop")]
    NoStorageContext,
}

/// Read cursor over a byte buffer.
pub struct Reader<'a> {
    bytes: &'a [u8],
    total: usize,
    storage_contexts: Vec<usize>,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            total: 0,
            storage_contexts: Vec::new(),
        }
    }

    // Consume `count` bytes as they appear on the wire
    pub fn read_bytes_ref(&mut self, count: usize) -> Result<&'a [u8], ReaderError> {
        let end = self
            .total
            .checked_add(count)
            .ok_or(ReaderError::InvalidSize)?;
        if end > self.bytes.len() {
            return Err(ReaderError::InvalidSize);
        }
        let slice = &self.bytes[self.total..end];
        self.total = end;
        Ok(slice)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, ReaderError> {
        self.read_bytes_ref(count).map(|b| b.to_vec())
    }

    // Consume `count` bytes and return them in reversed order
    pub fn read_swapped(&mut self, count: usize) -> Result<Vec<u8>, ReaderError> {
        let mut bytes = self.read_bytes(count)?;
        bytes.reverse();
        Ok(bytes)
    }

    pub fn read_bytes_32(&mut self) -> Result<[u8; 32], ReaderError> {
        let bytes = self.read_bytes_ref(32)?;
        bytes.try_into().map_err(|_| ReaderError::InvalidSize)
    }

    pub fn read_hash(&mut self) -> Result<Hash, ReaderError> {
        let bytes = self.read_bytes_ref(HASH_SIZE)?;
        Hash::from_slice(bytes).ok_or(ReaderError::InvalidSize)
    }

    /// Little-endian unsigned integer of `size` bytes (1..=8).
    pub fn read_uint(&mut self, size: usize) -> Result<u64, ReaderError> {
        if size == 0 || size > 8 {
            return Err(ReaderError::InvalidSize);
        }
        let bytes = self.read_bytes_ref(size)?;
        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_u8(&mut self) -> Result<u8, ReaderError> {
        Ok(self.read_bytes_ref(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ReaderError> {
        let bytes = self.read_bytes_ref(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, ReaderError> {
        let bytes = self.read_bytes_ref(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, ReaderError> {
        self.read_uint(8)
    }

    pub fn read_compact_size(&mut self) -> Result<u64, ReaderError> {
        let first = self.read_u8()?;
        match first {
            0xfd => self.read_uint(2),
            0xfe => self.read_uint(4),
            0xff => self.read_uint(8),
            value => Ok(value as u64),
        }
    }

    // Length-prefixed byte string (CompactSize + bytes)
    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>, ReaderError> {
        let len = self.read_compact_size()?;
        let len = usize::try_from(len).map_err(|_| ReaderError::InvalidSize)?;
        self.read_bytes(len)
    }

    /// Mark the current position; the matching pop returns every byte
    /// consumed since.
    pub fn push_storage_context(&mut self) {
        self.storage_contexts.push(self.total);
    }

    pub fn pop_storage_context(&mut self) -> Result<Vec<u8>, ReaderError> {
        let start = self
            .storage_contexts
            .pop()
            .ok_or(ReaderError::NoStorageContext)?;
        Ok(self.bytes[start..self.total].to_vec())
    }

    pub fn total_read(&self) -> usize {
        self.total
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.total
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}
