//! Merkle Tree for Ledger Entries
//!
//! Leaves are entry hashes in sequence order. An internal node is
//! `SHA-256(left || right)`; a level with an odd number of nodes pairs its
//! last node with itself. A single leaf is its own root.
//!
//! [`MerkleFrontier`] maintains the same root incrementally: it keeps only
//! the roots of the perfect subtrees in the binary decomposition of the
//! leaf count, so an append touches O(log n) nodes and the whole state can
//! be carried in a checkpoint.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LedgerError, Result};
use crate::ledger::digest::{Digest, EMPTY_ROOT};

/// Compact incremental Merkle accumulator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MerkleFrontier {
    leaf_count: u64,
    /// `subtrees[k]` is the root of a perfect subtree of height `k`, present
    /// when bit `k` of `leaf_count` is set.
    subtrees: Vec<Option<Digest>>,
    #[serde(skip)]
    hashes_computed: u64,
}

impl MerkleFrontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a frontier from already-known leaf hashes.
    pub fn from_leaves<'a, I>(leaves: I) -> Self
    where
        I: IntoIterator<Item = &'a Digest>,
    {
        let mut frontier = Self::new();
        for leaf in leaves {
            frontier.push(*leaf);
        }
        frontier
    }

    pub fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    /// Number of node hashes computed by this accumulator so far.
    pub fn hashes_computed(&self) -> u64 {
        self.hashes_computed
    }

    /// Add the next leaf.
    pub fn push(&mut self, leaf: Digest) {
        let mut node = leaf;
        let mut height = 0;
        while let Some(Some(left)) = self.subtrees.get(height) {
            node = Digest::combine(left, &node);
            self.hashes_computed += 1;
            self.subtrees[height] = None;
            height += 1;
        }
        if height == self.subtrees.len() {
            self.subtrees.push(Some(node));
        } else {
            self.subtrees[height] = Some(node);
        }
        self.leaf_count += 1;
    }

    /// Root over all leaves pushed so far.
    pub fn root(&mut self) -> Digest {
        let n = self.leaf_count;
        if n == 0 {
            return EMPTY_ROOT;
        }

        // The lowest set bit marks the subtree holding the last leaf.
        let lowest = n.trailing_zeros() as usize;
        let mut acc = match self.subtrees.get(lowest).copied().flatten() {
            Some(node) => node,
            None => return EMPTY_ROOT,
        };

        let mut height = lowest;
        while height < 64 && (1u64 << height) < n {
            acc = match self.subtrees.get(height).copied().flatten() {
                Some(left) if height > lowest => Digest::combine(&left, &acc),
                _ => Digest::combine(&acc, &acc),
            };
            self.hashes_computed += 1;
            height += 1;
        }
        acc
    }

    /// Root the tree would have after pushing `leaf`, without changing `self`.
    pub fn root_with(&self, leaf: Digest) -> Digest {
        let mut preview = self.clone();
        preview.push(leaf);
        preview.root()
    }
}

impl PartialEq for MerkleFrontier {
    fn eq(&self, other: &Self) -> bool {
        self.leaf_count == other.leaf_count && self.subtrees == other.subtrees
    }
}

impl Eq for MerkleFrontier {}

/// Compute the Merkle root of `leaves` from scratch.
pub fn merkle_root(leaves: &[Digest]) -> Digest {
    if leaves.is_empty() {
        return EMPTY_ROOT;
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level[0]
}

fn next_level(level: &[Digest]) -> Vec<Digest> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => Digest::combine(left, right),
            [single] => Digest::combine(single, single),
            _ => unreachable!("chunks(2) yields one or two nodes"),
        })
        .collect()
}

/// Build an inclusion proof for `leaves[index]`.
///
/// Works on its own copy of each level; `leaves` is never modified.
pub fn inclusion_proof(leaves: &[Digest], index: usize) -> Result<MerkleProof> {
    if index >= leaves.len() {
        return Err(LedgerError::NotFound(index as u64));
    }

    let mut siblings = Vec::new();
    let mut level = leaves.to_vec();
    let mut position = index;

    while level.len() > 1 {
        let sibling = if position % 2 == 1 {
            level[position - 1]
        } else {
            level.get(position + 1).copied().unwrap_or(level[position])
        };
        siblings.push(sibling);
        level = next_level(&level);
        position /= 2;
    }

    debug!(
        "Built inclusion proof for leaf {} of {} ({} siblings)",
        index,
        leaves.len(),
        siblings.len()
    );

    Ok(MerkleProof {
        leaf_index: index as u64,
        tree_size: leaves.len() as u64,
        leaf_hash: leaves[index],
        siblings,
        root: level[0],
    })
}

/// Sibling path from one leaf to a Merkle root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: u64,
    pub tree_size: u64,
    pub leaf_hash: Digest,
    pub siblings: Vec<Digest>,
    pub root: Digest,
}

impl MerkleProof {
    /// Recompute the root from the leaf and sibling path.
    pub fn computed_root(&self) -> Digest {
        let mut node = self.leaf_hash;
        let mut position = self.leaf_index;
        for sibling in &self.siblings {
            node = if position % 2 == 1 {
                Digest::combine(sibling, &node)
            } else {
                Digest::combine(&node, sibling)
            };
            position /= 2;
        }
        node
    }

    /// Verify this proof against the root it carries.
    pub fn verify(&self) -> bool {
        self.verify_against(&self.root)
    }

    /// Verify this proof against an externally trusted root.
    pub fn verify_against(&self, expected_root: &Digest) -> bool {
        if self.leaf_index >= self.tree_size || self.siblings.len() != proof_depth(self.tree_size)
        {
            return false;
        }
        &self.computed_root() == expected_root
    }

    pub fn size(&self) -> usize {
        self.siblings.len()
    }

    pub fn summary(&self) -> String {
        format!(
            "Merkle proof for leaf {} of {}: {} hashes, root: {}",
            self.leaf_index,
            self.tree_size,
            self.siblings.len(),
            self.root
        )
    }
}

/// Number of levels above the leaves in a tree of `tree_size` leaves.
fn proof_depth(tree_size: u64) -> usize {
    let mut depth = 0;
    let mut width = tree_size;
    while width > 1 {
        width = width.div_ceil(2);
        depth += 1;
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(count: usize) -> Vec<Digest> {
        (0..count).map(|i| Digest::of(&(i as u64).to_be_bytes())).collect()
    }

    #[test]
    fn test_empty_tree() {
        assert_eq!(merkle_root(&[]), EMPTY_ROOT);
        assert_eq!(MerkleFrontier::new().root(), EMPTY_ROOT);
    }

    #[test]
    fn test_single_leaf_is_root() {
        let leaf = Digest::of(b"only");
        assert_eq!(merkle_root(&[leaf]), leaf);
        assert_eq!(MerkleFrontier::from_leaves(&[leaf]).root(), leaf);
    }

    #[test]
    fn test_odd_level_duplicates_last_node() {
        let l = leaves(3);
        let expected = Digest::combine(
            &Digest::combine(&l[0], &l[1]),
            &Digest::combine(&l[2], &l[2]),
        );
        assert_eq!(merkle_root(&l), expected);
    }

    #[test]
    fn test_frontier_matches_full_construction() {
        let all = leaves(70);
        let mut frontier = MerkleFrontier::new();
        for (i, leaf) in all.iter().enumerate() {
            let preview = frontier.root_with(*leaf);
            frontier.push(*leaf);
            let expected = merkle_root(&all[..=i]);
            assert_eq!(frontier.root(), expected, "root mismatch at size {}", i + 1);
            assert_eq!(preview, expected, "preview mismatch at size {}", i + 1);
        }
        assert_eq!(frontier.leaf_count(), 70);
    }

    #[test]
    fn test_root_with_leaves_frontier_untouched() {
        let mut frontier = MerkleFrontier::from_leaves(&leaves(5));
        let before = frontier.clone();
        let _ = frontier.root_with(Digest::of(b"next"));
        assert_eq!(frontier, before);
        assert_eq!(frontier.root(), merkle_root(&leaves(5)));
    }

    #[test]
    fn test_all_proofs_verify() {
        for size in 1..=17 {
            let l = leaves(size);
            let root = merkle_root(&l);
            for i in 0..size {
                let proof = inclusion_proof(&l, i).unwrap();
                assert_eq!(proof.root, root);
                assert!(proof.verify(), "proof {} of {} failed", i, size);
            }
        }
    }

    #[test]
    fn test_proof_leaves_input_intact() {
        let l = leaves(9);
        let copy = l.clone();
        let _ = inclusion_proof(&l, 4).unwrap();
        assert_eq!(l, copy);
    }

    #[test]
    fn test_altered_sibling_fails() {
        let l = leaves(8);
        let mut proof = inclusion_proof(&l, 5).unwrap();
        assert!(proof.verify());
        for i in 0..proof.siblings.len() {
            let original = proof.siblings[i];
            proof.siblings[i] = Digest::of(b"forged");
            assert!(!proof.verify(), "forged sibling {} accepted", i);
            proof.siblings[i] = original;
        }
    }

    #[test]
    fn test_proof_invalid_index() {
        assert!(inclusion_proof(&leaves(3), 3).is_err());
        assert!(inclusion_proof(&[], 0).is_err());
    }

    #[test]
    fn test_proof_against_wrong_root() {
        let l = leaves(4);
        let proof = inclusion_proof(&l, 1).unwrap();
        assert!(!proof.verify_against(&merkle_root(&l[..3])));
    }
}
