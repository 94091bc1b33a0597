use ethereum_types::{H256, U256};
use serde::{Deserialize, Serialize};

use repminer_crypto::{
    hash::{keccak256, EMPTY_HASH},
    patricia::Leaf,
    proof::{expected_branch_mask, index_path, Proof},
};

use crate::reputation::{u64_word, ReputationKey, ReputationValue};

/// Proof that a reputation trie holds `value` and `uid` under `key`, or that it does not hold
/// `key` at all when `uid` is 0
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationProof {
    pub key: ReputationKey,
    pub value: i128,
    pub uid: u64,
    pub proof: Proof,
}

impl ReputationProof {
    /// Proof of a key that is stored with `reputation`
    pub fn present(key: ReputationKey, reputation: ReputationValue, proof: Proof) -> Self {
        ReputationProof {
            key,
            value: reputation.value,
            uid: reputation.uid,
            proof,
        }
    }

    /// Proof of a key that is not in the trie
    pub fn absent(key: ReputationKey, proof: Proof) -> Self {
        ReputationProof {
            key,
            value: 0,
            uid: 0,
            proof,
        }
    }

    /// Whether the proven key exists
    pub fn is_present(&self) -> bool {
        self.uid != 0
    }

    /// The stored reputation, if any
    pub fn reputation(&self) -> Option<ReputationValue> {
        if self.is_present() {
            Some(ReputationValue {
                value: self.value,
                uid: self.uid,
            })
        } else {
            None
        }
    }

    /// Hash committed at the key's path
    pub fn leaf_hash(&self) -> H256 {
        self.reputation()
            .map(|reputation| reputation.leaf_hash())
            .unwrap_or(EMPTY_HASH)
    }

    /// Check this proof against a state root
    pub fn verify(&self, root: &H256) -> bool {
        // An absent key cannot claim a value
        if !self.is_present() && self.value != 0 {
            return false;
        }

        self.proof.verify(&self.key.path(), self.leaf_hash(), root)
    }
}

/// Leaf of the justification tree: the reputation state after some number of steps
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JustificationLeaf {
    /// Root of the reputation trie
    pub state_root: H256,
    /// Number of keys in the reputation trie
    pub n_nodes: u64,
}

impl JustificationLeaf {
    /// 64-byte leaf encoding: `state_root || n_nodes`
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(self.state_root.as_bytes());
        bytes[32..].copy_from_slice(&u64_word(self.n_nodes));

        bytes
    }
}

impl Leaf for JustificationLeaf {
    fn leaf_hash(&self) -> H256 {
        keccak256(&self.to_bytes())
    }
}

/// Proof that a justification tree holds `leaf` at position `index`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JustificationProof {
    pub index: u64,
    pub leaf: JustificationLeaf,
    pub proof: Proof,
}

impl JustificationProof {
    /// Check this proof against a justification root hash committing to `jrh_n_nodes` leaves.
    ///
    /// Leaves are keyed by index, so the branch mask is fully determined by the index and the
    /// number of leaves and any other mask is rejected.
    pub fn verify(&self, jrh: &H256, jrh_n_nodes: u64) -> bool {
        if self.index >= jrh_n_nodes {
            return false;
        }
        let expected_mask = expected_branch_mask(U256::from(jrh_n_nodes), U256::from(self.index));
        if self.proof.branch_mask != expected_mask {
            return false;
        }

        self.proof.verify(
            &index_path(U256::from(self.index)),
            self.leaf.leaf_hash(),
            jrh,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::H160;
    use repminer_crypto::patricia::PatriciaTree;

    fn key(user: u8) -> ReputationKey {
        ReputationKey::new(H160::repeat_byte(9), U256::from(1), H160::repeat_byte(user))
    }

    #[test]
    fn reputation_proofs() {
        let mut trie = PatriciaTree::new();
        let stored = ReputationValue { value: 10, uid: 1 };
        trie.insert(key(1).path(), stored);
        let root = trie.root_hash();

        let present = ReputationProof::present(key(1), stored, trie.proof(&key(1).path()));
        assert!(present.verify(&root));
        assert_eq!(present.reputation(), Some(stored));

        let absent = ReputationProof::absent(key(2), trie.proof(&key(2).path()));
        assert!(absent.verify(&root));
        assert_eq!(absent.reputation(), None);

        let mut lying = absent.clone();
        lying.value = 3;
        assert!(!lying.verify(&root));
    }

    #[test]
    fn justification_proofs_need_the_derived_mask() {
        let mut tree = PatriciaTree::new();
        let leaves: Vec<JustificationLeaf> = (0..5u64)
            .map(|i| JustificationLeaf {
                state_root: keccak256(&i.to_be_bytes()),
                n_nodes: i,
            })
            .collect();
        for (i, leaf) in leaves.iter().enumerate() {
            tree.insert(index_path(U256::from(i)), *leaf);
        }
        let jrh = tree.root_hash();

        let mut proof = JustificationProof {
            index: 3,
            leaf: leaves[3],
            proof: tree.proof(&index_path(U256::from(3))),
        };
        assert!(proof.verify(&jrh, 5));
        assert!(!proof.verify(&jrh, 3));

        proof.proof.branch_mask = proof.proof.branch_mask | U256::from(1u64 << 40);
        assert!(!proof.verify(&jrh, 5));
    }
}
