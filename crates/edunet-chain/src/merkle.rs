//! Merkle trees over transaction ids.
//!
//! Levels are built bottom-up: adjacent hashes pair; an odd trailing hash is
//! paired with itself. Each parent is the double SHA-256 of the
//! concatenation of its children. An inclusion proof is the sibling hash at
//! every level; the leaf index's low bit at each level decides which side
//! the sibling joins from.

use edunet_crypto::{double_sha256, Hash256};

fn parent(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_ref());
    buf[32..].copy_from_slice(right.as_ref());
    double_sha256(&buf)
}

/// Compute the Merkle root of a list of leaf hashes.
///
/// The root of an empty list is the all-zero hash.
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    if leaves.is_empty() {
        return Hash256::zero();
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            next.push(parent(left, right));
        }
        level = next;
    }
    level[0]
}

/// A fully materialized Merkle tree, kept around when proofs are needed.
pub struct MerkleTree {
    /// levels[0] is the leaf level; the last level holds the root.
    levels: Vec<Vec<Hash256>>,
}

impl MerkleTree {
    /// Build the tree from leaf hashes.
    pub fn new(leaves: &[Hash256]) -> Self {
        let mut levels = vec![leaves.to_vec()];
        if leaves.is_empty() {
            return Self { levels };
        }
        while levels.last().map(Vec::len).unwrap_or(0) > 1 {
            let current = levels.last().expect("at least one level");
            let mut next = Vec::with_capacity((current.len() + 1) / 2);
            for pair in current.chunks(2) {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                next.push(parent(left, right));
            }
            levels.push(next);
        }
        Self { levels }
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// The Merkle root; all-zero for an empty tree.
    pub fn root(&self) -> Hash256 {
        self.levels
            .last()
            .and_then(|level| level.first().copied())
            .unwrap_or_else(Hash256::zero)
    }

    /// Inclusion proof for the leaf at `index`: the sibling at every level,
    /// leaf level first. Returns `None` for an out-of-range index.
    pub fn proof(&self, index: usize) -> Option<Vec<Hash256>> {
        if index >= self.leaf_count() {
            return None;
        }
        let mut proof = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_idx = idx ^ 1;
            // An odd tail duplicates itself.
            let sibling = level.get(sibling_idx).unwrap_or(&level[idx]);
            proof.push(*sibling);
            idx /= 2;
        }
        Some(proof)
    }
}

/// Verify an inclusion proof produced by [`MerkleTree::proof`].
pub fn verify_proof(
    leaf: &Hash256,
    proof: &[Hash256],
    root: &Hash256,
    index: usize,
    leaf_count: usize,
) -> bool {
    if leaf_count == 0 || index >= leaf_count {
        return false;
    }
    let mut current = *leaf;
    let mut idx = index;
    for sibling in proof {
        current = if idx & 1 == 0 {
            parent(&current, sibling)
        } else {
            parent(sibling, &current)
        };
        idx /= 2;
    }
    current == *root
}

#[cfg(test)]
mod tests {
    use super::*;
    use edunet_crypto::sha256;

    fn leaves(n: usize) -> Vec<Hash256> {
        (0..n).map(|i| sha256(&[i as u8])).collect()
    }

    #[test]
    fn test_empty_root_is_zero() {
        assert_eq!(merkle_root(&[]), Hash256::zero());
        assert_eq!(MerkleTree::new(&[]).root(), Hash256::zero());
    }

    #[test]
    fn test_single_leaf_is_root() {
        let leaf = sha256(b"only");
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn test_two_leaves() {
        let l = leaves(2);
        let expected = {
            let mut buf = Vec::new();
            buf.extend_from_slice(l[0].as_ref());
            buf.extend_from_slice(l[1].as_ref());
            double_sha256(&buf)
        };
        assert_eq!(merkle_root(&l), expected);
    }

    #[test]
    fn test_odd_count_duplicates_tail() {
        // With three leaves the third pairs with itself.
        let l = leaves(3);
        let ab = merkle_root(&l[..2]);
        let cc = merkle_root(&[l[2], l[2]]);
        assert_eq!(merkle_root(&l), merkle_root(&[ab, cc]));
    }

    #[test]
    fn test_tree_matches_free_function() {
        for n in 1..20 {
            let l = leaves(n);
            assert_eq!(MerkleTree::new(&l).root(), merkle_root(&l), "n = {n}");
        }
    }

    #[test]
    fn test_all_proofs_verify() {
        for n in 1..20 {
            let l = leaves(n);
            let tree = MerkleTree::new(&l);
            let root = tree.root();
            for (i, leaf) in l.iter().enumerate() {
                let proof = tree.proof(i).unwrap();
                assert!(
                    verify_proof(leaf, &proof, &root, i, n),
                    "proof for leaf {i} of {n}"
                );
            }
        }
    }

    #[test]
    fn test_mutated_leaf_fails_proof() {
        let l = leaves(7);
        let tree = MerkleTree::new(&l);
        let root = tree.root();
        let proof = tree.proof(3).unwrap();

        let mut bad = *l[3].as_bytes();
        bad[0] ^= 0x01;
        assert!(!verify_proof(&Hash256::new(bad), &proof, &root, 3, 7));
    }

    #[test]
    fn test_mutated_proof_hash_fails() {
        let l = leaves(8);
        let tree = MerkleTree::new(&l);
        let root = tree.root();
        let mut proof = tree.proof(5).unwrap();

        let mut bad = *proof[1].as_bytes();
        bad[31] ^= 0x80;
        proof[1] = Hash256::new(bad);
        assert!(!verify_proof(&l[5], &proof, &root, 5, 8));
    }

    #[test]
    fn test_wrong_index_fails() {
        let l = leaves(8);
        let tree = MerkleTree::new(&l);
        let root = tree.root();
        let proof = tree.proof(2).unwrap();
        assert!(!verify_proof(&l[2], &proof, &root, 3, 8));
    }

    #[test]
    fn test_out_of_range_proof_rejected() {
        let tree = MerkleTree::new(&leaves(4));
        assert!(tree.proof(4).is_none());
        assert!(!verify_proof(
            &sha256(b"x"),
            &[],
            &tree.root(),
            9,
            4
        ));
    }
}
