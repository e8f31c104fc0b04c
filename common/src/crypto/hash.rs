use serde::de::Error as SerdeError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    cmp::Ordering,
    convert::TryInto,
    fmt::{Display, Error, Formatter},
    str::FromStr,
};

pub const HASH_SIZE: usize = 32; // 32 bytes / 256 bits

/// 256-bit value in wire (internal) byte order.
///
/// The node displays hashes byte-reversed; use `to_display_hex` and
/// `from_display_hex` at the RPC boundary.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Hash, Default)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    pub const fn zero() -> Self {
        Hash::new([0; HASH_SIZE])
    }

    pub const fn max() -> Self {
        Hash::new([u8::MAX; HASH_SIZE])
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; HASH_SIZE] = bytes.try_into().ok()?;
        Some(Hash(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; HASH_SIZE] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    // Byte-reversed hex, as printed by the node for txids and block hashes
    pub fn to_display_hex(&self) -> String {
        let mut bytes = self.0;
        bytes.reverse();
        hex::encode(bytes)
    }

    pub fn from_display_hex(s: &str) -> Result<Self, &'static str> {
        let mut hash = Hash::from_str(s)?;
        hash.0.reverse();
        Ok(hash)
    }

    /// Compare as 256-bit numbers whose most significant byte is stored
    /// last (index 31), which is how digests are compared against targets.
    pub fn cmp_reversed(&self, other: &Hash) -> Ordering {
        for i in (0..HASH_SIZE).rev() {
            match self.0[i].cmp(&other.0[i]) {
                Ordering::Equal => continue,
                ordering => return ordering,
            }
        }
        Ordering::Equal
    }
}

impl FromStr for Hash {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| "Invalid hex string")?;
        let bytes: [u8; HASH_SIZE] = bytes.try_into().map_err(|_| "Invalid hash")?;
        Ok(Hash::new(bytes))
    }
}

// Double SHA-256, the digest used for txids, block hashes and proof-of-work
#[inline(always)]
pub fn hash256(value: &[u8]) -> Hash {
    let first = Sha256::digest(value);
    let second = Sha256::digest(first);
    Hash(second.into())
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", &self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'a> Deserialize<'a> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let hex = String::deserialize(deserializer)?;
        if hex.len() != HASH_SIZE * 2 {
            return Err(SerdeError::custom("Invalid hex length"));
        }
        Hash::from_str(&hex).map_err(SerdeError::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash256_empty() {
        // Well-known double SHA-256 of the empty string
        assert_eq!(
            hash256(&[]).to_hex(),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn test_display_hex_is_reversed() {
        let mut bytes = [0u8; HASH_SIZE];
        bytes[0] = 0x01;
        let hash = Hash::new(bytes);
        assert!(hash.to_display_hex().ends_with("01"));
        assert_eq!(Hash::from_display_hex(&hash.to_display_hex()), Ok(hash));
    }

    #[test]
    fn test_cmp_reversed_uses_last_byte_first() {
        let mut low = [0xffu8; HASH_SIZE];
        low[31] = 0x00;
        let mut high = [0x00u8; HASH_SIZE];
        high[31] = 0x01;
        assert_eq!(
            Hash::new(low).cmp_reversed(&Hash::new(high)),
            Ordering::Less
        );
        assert_eq!(Hash::max().cmp_reversed(&Hash::max()), Ordering::Equal);
    }
}
