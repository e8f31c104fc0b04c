// Merkle root over transaction ids

use crate::crypto::{hash256, Hash, HASH_SIZE};

/// Calculate the merkle root of a list of transaction hashes (wire order).
///
/// Parent nodes are hash256(left || right). On a level with an odd number
/// of nodes the last one is paired with itself. A single transaction is
/// its own root.
pub fn calculate_merkle_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return Hash::zero();
    }

    let mut level: Vec<Hash> = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|chunk| {
                let left = &chunk[0];
                let right = chunk.get(1).unwrap_or(left);
                hash_pair(left, right)
            })
            .collect();
    }

    level[0]
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut bytes = [0u8; HASH_SIZE * 2];
    bytes[..HASH_SIZE].copy_from_slice(left.as_bytes());
    bytes[HASH_SIZE..].copy_from_slice(right.as_bytes());
    hash256(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_hash_is_root() {
        let h = Hash::new([9u8; 32]);
        assert_eq!(calculate_merkle_root(&[h]), h);
    }

    #[test]
    fn test_odd_level_duplicates_last() {
        let a = Hash::new([1u8; 32]);
        let b = Hash::new([2u8; 32]);
        let c = Hash::new([3u8; 32]);
        let expected = hash_pair(&hash_pair(&a, &b), &hash_pair(&c, &c));
        assert_eq!(calculate_merkle_root(&[a, b, c]), expected);
    }

    #[test]
    fn test_empty() {
        assert_eq!(calculate_merkle_root(&[]), Hash::zero());
    }
}
