//! Merkle root over transaction hashes.

use crate::crypto::hash256;
use crate::UInt256;

/// Computes the root by pairwise double-hashing, duplicating the last node
/// of odd levels. A single hash is its own root; an empty list yields zero.
pub fn compute_root(hashes: &[UInt256]) -> UInt256 {
    if hashes.is_empty() {
        return UInt256::zero();
    }
    let mut level: Vec<UInt256> = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = pair[0];
                let right = pair.get(1).copied().unwrap_or(left);
                let mut buffer = [0u8; 64];
                buffer[..32].copy_from_slice(left.as_bytes());
                buffer[32..].copy_from_slice(right.as_bytes());
                hash256(&buffer)
            })
            .collect();
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_hash_is_root() {
        let hash = UInt256::from_array([5u8; 32]);
        assert_eq!(compute_root(&[hash]), hash);
    }

    #[test]
    fn test_odd_level_duplicates_last() {
        let a = UInt256::from_array([1u8; 32]);
        let b = UInt256::from_array([2u8; 32]);
        let c = UInt256::from_array([3u8; 32]);
        assert_eq!(compute_root(&[a, b, c]), compute_root(&[a, b, c, c]));
        assert_ne!(compute_root(&[a, b]), compute_root(&[b, a]));
    }
}
