//! BLAKE3 segment-tree hashing for fragment content addressing.
//!
//! A fragment is divided into [`SEGMENT_SIZE`] segments and each segment is
//! hashed individually. The segment hashes form the leaf nodes of a binary
//! tree, with parent nodes computed by hashing the concatenation of their
//! children. The tree root is the fragment's [`RootHash`].

use crate::SEGMENT_SIZE;
use crate::hash::{HASH_SIZE, RootHash};
use blake3::Hasher;

/// Fragment segment tree
///
/// Contains the root hash (the fragment's content address) and all segment
/// hashes (for selective verification of individual segments).
#[derive(Debug, Clone)]
pub struct SegmentTree {
    /// Merkle root hash
    pub root: RootHash,
    /// Segment hashes (leaf nodes of the tree)
    pub segments: Vec<[u8; HASH_SIZE]>,
}

impl SegmentTree {
    /// Get number of segments
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Verify a segment against its expected hash
    #[must_use]
    pub fn verify_segment(&self, segment_index: usize, segment_data: &[u8]) -> bool {
        match self.segments.get(segment_index) {
            Some(expected) => &hash_segment(segment_data) == expected,
            None => false,
        }
    }

    /// Get segment hash
    #[must_use]
    pub fn get_segment_hash(&self, segment_index: usize) -> Option<&[u8; HASH_SIZE]> {
        self.segments.get(segment_index)
    }
}

fn hash_segment(segment: &[u8]) -> [u8; HASH_SIZE] {
    #[cfg(feature = "rayon")]
    {
        let mut hasher = Hasher::new();
        hasher.update_rayon(segment);
        *hasher.finalize().as_bytes()
    }
    #[cfg(not(feature = "rayon"))]
    {
        *blake3::hash(segment).as_bytes()
    }
}

/// Compute the segment tree of fragment bytes
///
/// A zero-length fragment has a single empty segment, so every fragment has
/// at least one leaf.
///
/// # Example
///
/// ```
/// use fragnet_files::tree_hash::compute_segment_tree;
///
/// let data = vec![0xAA; 1024 * 1024];
/// let tree = compute_segment_tree(&data);
/// assert_eq!(tree.segment_count(), 4);
/// ```
#[must_use]
pub fn compute_segment_tree(data: &[u8]) -> SegmentTree {
    compute_segment_tree_with_size(data, SEGMENT_SIZE)
}

/// Compute the segment tree with a custom segment size
#[must_use]
pub fn compute_segment_tree_with_size(data: &[u8], segment_size: usize) -> SegmentTree {
    let segment_size = segment_size.max(1);
    let mut segments = Vec::with_capacity(data.len().div_ceil(segment_size).max(1));

    if data.is_empty() {
        segments.push(hash_segment(&[]));
    } else {
        for segment in data.chunks(segment_size) {
            segments.push(hash_segment(segment));
        }
    }

    let root = RootHash::from_bytes(compute_merkle_root(&segments));
    SegmentTree { root, segments }
}

/// Content address of fragment bytes
#[must_use]
pub fn fragment_root(data: &[u8]) -> RootHash {
    compute_segment_tree(data).root
}

/// Check fragment bytes against an expected root
#[must_use]
pub fn verify_fragment(data: &[u8], expected: &RootHash) -> bool {
    fragment_root(data) == *expected
}

/// Compute Merkle root from leaf hashes
///
/// Implements a binary Merkle tree where parent nodes are computed by
/// hashing the concatenation of their two children. If there's an odd
/// number of nodes at any level, the last node is promoted to the next level.
///
/// # Example
///
/// ```
/// use fragnet_files::tree_hash::compute_merkle_root;
///
/// let leaves = vec![[1u8; 32], [2u8; 32], [3u8; 32], [4u8; 32]];
/// let root = compute_merkle_root(&leaves);
/// ```
#[must_use]
pub fn compute_merkle_root(leaves: &[[u8; HASH_SIZE]]) -> [u8; HASH_SIZE] {
    if leaves.is_empty() {
        return [0u8; HASH_SIZE];
    }

    let mut current_level = leaves.to_vec();

    while current_level.len() > 1 {
        let mut next_level = Vec::with_capacity(current_level.len().div_ceil(2));

        for pair in current_level.chunks(2) {
            let hash = if pair.len() == 2 {
                let mut hasher = Hasher::new();
                hasher.update(&pair[0]);
                hasher.update(&pair[1]);
                *hasher.finalize().as_bytes()
            } else {
                // Odd number, promote single node
                pair[0]
            };

            next_level.push(hash);
        }

        current_level = next_level;
    }

    current_level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_count() {
        let data = vec![0xAA; 1024 * 1024];
        let tree = compute_segment_tree(&data);
        assert_eq!(tree.segment_count(), 4); // 1MB / 256KB
    }

    #[test]
    fn test_partial_last_segment() {
        let data = vec![0xAA; SEGMENT_SIZE + 1];
        let tree = compute_segment_tree(&data);
        assert_eq!(tree.segment_count(), 2);
    }

    #[test]
    fn test_empty_fragment_has_one_segment() {
        let tree = compute_segment_tree(&[]);
        assert_eq!(tree.segment_count(), 1);
        assert_eq!(tree.root.as_bytes(), blake3::hash(&[]).as_bytes());
    }

    #[test]
    fn test_root_is_deterministic() {
        let data: Vec<u8> = (0..700_000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(fragment_root(&data), fragment_root(&data.clone()));
    }

    #[test]
    fn test_root_changes_with_single_byte() {
        let data = vec![0x11; 600 * 1024];
        let mut tampered = data.clone();
        tampered[300 * 1024] ^= 0x01;
        assert_ne!(fragment_root(&data), fragment_root(&tampered));
    }

    #[test]
    fn test_verify_fragment() {
        let data = vec![0x42; 10_000];
        let root = fragment_root(&data);
        assert!(verify_fragment(&data, &root));
        assert!(!verify_fragment(&data[..9_999], &root));
    }

    #[test]
    fn test_segment_verification() {
        let data = vec![0xAA; 512 * 1024];
        let tree = compute_segment_tree(&data);

        let segment = vec![0xAA; SEGMENT_SIZE];
        assert!(tree.verify_segment(0, &segment));
        assert!(tree.verify_segment(1, &segment));

        let wrong = vec![0xBB; SEGMENT_SIZE];
        assert!(!tree.verify_segment(0, &wrong));
        assert!(!tree.verify_segment(2, &segment));
        assert!(tree.get_segment_hash(2).is_none());
    }

    #[test]
    fn test_single_segment_root_is_leaf() {
        let data = b"small fragment";
        let tree = compute_segment_tree(data);
        assert_eq!(tree.root.as_bytes(), &tree.segments[0]);
    }

    #[test]
    fn test_custom_segment_size() {
        let data = vec![0x01; 100];
        let tree = compute_segment_tree_with_size(&data, 30);
        assert_eq!(tree.segment_count(), 4);
    }

    #[test]
    fn test_merkle_root_single_leaf() {
        let leaf = [[1u8; 32]];
        assert_eq!(compute_merkle_root(&leaf), leaf[0]);
    }

    #[test]
    fn test_merkle_root_multiple_leaves() {
        let leaves = vec![[1u8; 32], [2u8; 32], [3u8; 32], [4u8; 32]];
        let root = compute_merkle_root(&leaves);

        for leaf in &leaves {
            assert_ne!(root, *leaf);
        }
    }

    #[test]
    fn test_merkle_root_empty() {
        let leaves: Vec<[u8; 32]> = vec![];
        assert_eq!(compute_merkle_root(&leaves), [0u8; 32]);
    }

    #[test]
    fn test_merkle_root_odd_number() {
        let leaves = vec![[1u8; 32], [2u8; 32], [3u8; 32]];
        let root = compute_merkle_root(&leaves);

        let mut hasher = Hasher::new();
        hasher.update(&leaves[0]);
        hasher.update(&leaves[1]);
        let left = *hasher.finalize().as_bytes();

        let mut hasher = Hasher::new();
        hasher.update(&left);
        hasher.update(&leaves[2]);
        assert_eq!(root, *hasher.finalize().as_bytes());
    }
}
