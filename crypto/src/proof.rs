//! Proofs over the sparse trie.
//!
//! A proof is the list of non-empty siblings met while walking from a leaf up to the root,
//! together with a bitfield saying at which heights those siblings sit. Height `0` is the
//! sibling of the leaf itself, height `255` the sibling of the root's child. Every other height
//! has an empty sibling, so it is not transmitted.
//!
//! The same proof shows that a path holds a given leaf hash or that it is empty (leaf hash
//! zero), which is what lets a dispute compare the state before and after one write with a
//! single list of siblings.

use ethereum_types::{H256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    hash::{keccak256_concat, u256_to_h256, EMPTY_HASH},
    patricia::{path_bit, DEPTH},
};

/// Errors that make a proof unusable
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProofError {
    /// The branch mask announces more siblings than were provided
    #[error("branch mask requires {expected} siblings but only {provided} were provided")]
    MissingSiblings {
        /// Number of bits set in the branch mask
        expected: usize,
        /// Length of the sibling list
        provided: usize,
    },
    /// More siblings were provided than the branch mask announces
    #[error("branch mask requires {expected} siblings but {provided} were provided")]
    ExtraSiblings {
        /// Number of bits set in the branch mask
        expected: usize,
        /// Length of the sibling list
        provided: usize,
    },
}

/// Merkle proof for one path of the trie
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// Bit `k` is set when the sibling at height `k` is not empty
    pub branch_mask: U256,
    /// Non-empty siblings, ordered from the leaf towards the root
    pub siblings: Vec<H256>,
}

impl Proof {
    /// Build a proof from `(height, sibling)` pairs collected in any order
    pub fn from_siblings<I>(siblings: I) -> Self
    where
        I: IntoIterator<Item = (usize, H256)>,
    {
        let mut siblings: Vec<(usize, H256)> = siblings.into_iter().collect();
        siblings.sort_by_key(|(height, _)| *height);

        let branch_mask = siblings
            .iter()
            .fold(U256::zero(), |mask, (height, _)| mask | (U256::one() << *height));

        Proof {
            branch_mask,
            siblings: siblings.into_iter().map(|(_, hash)| hash).collect(),
        }
    }

    /// Calculate the root of the trie given the path and the hash stored at its leaf, using the
    /// siblings stored in this proof. An absent leaf has hash `EMPTY_HASH`.
    pub fn implied_root(&self, path: &H256, leaf_hash: H256) -> Result<H256, ProofError> {
        let expected = (0..DEPTH).filter(|h| self.branch_mask.bit(*h)).count();
        if expected > self.siblings.len() {
            return Err(ProofError::MissingSiblings {
                expected,
                provided: self.siblings.len(),
            });
        }
        if expected < self.siblings.len() {
            return Err(ProofError::ExtraSiblings {
                expected,
                provided: self.siblings.len(),
            });
        }

        let mut siblings = self.siblings.iter();
        let mut hash = leaf_hash;
        for height in 0..DEPTH {
            let sibling = if self.branch_mask.bit(height) {
                // Cannot fail, the number of siblings was checked above
                siblings.next().copied().unwrap_or(EMPTY_HASH)
            } else {
                EMPTY_HASH
            };
            let depth = DEPTH - 1 - height;
            hash = if path_bit(path, depth) == 0 {
                keccak256_concat(&hash, &sibling)
            } else {
                keccak256_concat(&sibling, &hash)
            };
        }

        Ok(hash)
    }

    /// Verify that `path` holds `leaf_hash` in the trie with root `root`
    pub fn verify(&self, path: &H256, leaf_hash: H256, root: &H256) -> bool {
        self.implied_root(path, leaf_hash)
            .map(|implied| implied == *root)
            .unwrap_or(false)
    }
}

/// Branch mask of the proof for `index` in a trie whose keys are exactly the indices
/// `0..n_leaves`, written as 32-byte big-endian paths.
///
/// The sibling at height `k` covers the indices sharing `index >> (k + 1)` but not bit `k`; it
/// is non-empty as long as its first index exists.
pub fn expected_branch_mask(n_leaves: U256, index: U256) -> U256 {
    (0..DEPTH).fold(U256::zero(), |mask, height| {
        let sibling_start = ((index >> height) ^ U256::one()) << height;
        if sibling_start < n_leaves {
            mask | (U256::one() << height)
        } else {
            mask
        }
    })
}

/// Path of an index-keyed leaf: the index as a 32-byte big-endian word
pub fn index_path(index: U256) -> H256 {
    u256_to_h256(&index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::keccak256;

    #[test]
    fn empty_proof_of_empty_leaf_is_empty_root() {
        let proof = Proof::default();
        let path = keccak256(b"anything");
        assert_eq!(proof.implied_root(&path, EMPTY_HASH), Ok(EMPTY_HASH));
    }

    #[test]
    fn missing_siblings() {
        let proof = Proof {
            branch_mask: U256::from(0b101),
            siblings: vec![keccak256(b"a")],
        };
        assert_eq!(
            proof.implied_root(&H256::zero(), EMPTY_HASH),
            Err(ProofError::MissingSiblings {
                expected: 2,
                provided: 1
            })
        );
    }

    #[test]
    fn extra_siblings() {
        let proof = Proof {
            branch_mask: U256::zero(),
            siblings: vec![keccak256(b"a")],
        };
        assert_eq!(
            proof.implied_root(&H256::zero(), EMPTY_HASH),
            Err(ProofError::ExtraSiblings {
                expected: 0,
                provided: 1
            })
        );
    }

    #[test]
    fn branch_mask_of_dense_index_trie() {
        // One leaf: nothing next to it
        assert_eq!(expected_branch_mask(1.into(), 0.into()), U256::zero());
        // Two leaves: each one is the sibling of the other at height 0
        assert_eq!(expected_branch_mask(2.into(), 0.into()), U256::one());
        assert_eq!(expected_branch_mask(2.into(), 1.into()), U256::one());
        // Five leaves [0..4]: leaf 4 only sees the subtree [0..3] at height 2
        assert_eq!(expected_branch_mask(5.into(), 4.into()), U256::from(0b100));
        // Leaf 0 sees 1, [2..3] and [4..7]
        assert_eq!(expected_branch_mask(5.into(), 0.into()), U256::from(0b111));
    }

    #[test]
    fn from_siblings_orders_by_height() {
        let a = keccak256(b"a");
        let b = keccak256(b"b");
        let proof = Proof::from_siblings(vec![(7, b), (2, a)]);
        assert_eq!(proof.branch_mask, U256::from(0b1000_0100));
        assert_eq!(proof.siblings, vec![a, b]);
    }
}
