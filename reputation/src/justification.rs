//! Justification tree
//!
//! One leaf per intermediate state of a replay, keyed by step index, together with the
//! reputation proofs needed to answer a challenge at any step.

use ethereum_types::{H256, U256};
use serde::{Deserialize, Serialize};

use repminer_crypto::{patricia::PatriciaTree, proof::index_path};
use repminer_data_structures::{
    dispute::ChallengeResponse,
    proof::{JustificationLeaf, JustificationProof, ReputationProof},
};
use repminer_storage::storage::{Storage, StorageHelper};

use crate::error::{ReputationError, Result};

/// Storage prefix of every justification tree
pub const JUSTIFICATION_PREFIX: &str = "dispute/jt/";

/// Storage key of the justification tree with root `jrh`
pub fn justification_key(jrh: &H256) -> Vec<u8> {
    format!("{}{}", JUSTIFICATION_PREFIX, hex::encode(jrh)).into_bytes()
}

/// Reputation proofs taken in the state of one justification leaf
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofBundle {
    /// Key written by the previous step
    pub just_updated: Option<ReputationProof>,
    /// Key written by the next step
    pub next_update: Option<ReputationProof>,
    /// Key holding the highest uid, when the next step creates a key
    pub newest: Option<ReputationProof>,
    /// User's reputation in the skill of the log entry, when the next step is a child update
    pub origin: Option<ReputationProof>,
    /// User's reputation in the child skill, when the next step is a child update
    pub child: Option<ReputationProof>,
}

#[derive(Serialize, Deserialize)]
struct StoredJustification {
    leaves: Vec<JustificationLeaf>,
    bundles: Vec<ProofBundle>,
}

/// State root and node count after every replay step, keyed by step index.
///
/// Leaf 0 is the starting state. Every leaf keeps the proofs needed to answer a challenge of
/// the step that follows it.
#[derive(Clone, Debug, Default)]
pub struct JustificationTree {
    tree: PatriciaTree<JustificationLeaf>,
    leaves: Vec<JustificationLeaf>,
    bundles: Vec<ProofBundle>,
}

impl JustificationTree {
    /// Tree without leaves
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next leaf, returning its index
    pub fn push(&mut self, leaf: JustificationLeaf, bundle: ProofBundle) -> u64 {
        let index = self.leaves.len() as u64;
        self.tree.insert(index_path(U256::from(index)), leaf);
        self.leaves.push(leaf);
        self.bundles.push(bundle);

        index
    }

    /// Justification root hash
    pub fn root_hash(&self) -> H256 {
        self.tree.root_hash()
    }

    /// Number of leaves, one more than the number of steps
    pub fn n_nodes(&self) -> u64 {
        self.leaves.len() as u64
    }

    /// State after `index` steps
    pub fn leaf(&self, index: u64) -> Option<JustificationLeaf> {
        self.leaves.get(usize::try_from(index).ok()?).copied()
    }

    /// Last leaf: the state at the end of the replay
    pub fn last_leaf(&self) -> Option<JustificationLeaf> {
        self.leaves.last().copied()
    }

    /// Proof of leaf `index` against `root_hash()`
    pub fn get_proof(&self, index: u64) -> Option<JustificationProof> {
        let leaf = self.leaf(index)?;

        Some(JustificationProof {
            index,
            leaf,
            proof: self.tree.proof(&index_path(U256::from(index))),
        })
    }

    /// Proofs recorded with leaf `index`
    pub fn bundle(&self, index: u64) -> Option<&ProofBundle> {
        self.bundles.get(usize::try_from(index).ok()?)
    }

    /// Response to a challenge of `step`, the last leaf both parties agree on
    pub fn challenge_response(&self, round: u64, index: u64, step: u64) -> Result<ChallengeResponse> {
        let out_of_range = || ReputationError::StepOutOfRange {
            step,
            n_leaves: self.n_nodes(),
        };
        let next = step.checked_add(1).ok_or_else(out_of_range)?;

        let agree_state = self.get_proof(step).ok_or_else(out_of_range)?;
        let disagree_state = self.get_proof(next).ok_or_else(out_of_range)?;
        let before = self.bundle(step).ok_or_else(out_of_range)?;
        let after = self.bundle(next).ok_or_else(out_of_range)?;
        let agree_reputation = before.next_update.clone().ok_or_else(out_of_range)?;
        let written = after.just_updated.as_ref().ok_or_else(out_of_range)?;

        Ok(ChallengeResponse {
            round,
            index,
            key: agree_reputation.key,
            agree_state,
            disagree_state,
            disagree_value: written.value,
            disagree_uid: written.uid,
            agree_reputation,
            newest_reputation: before.newest.clone(),
            origin_reputation: before.origin.clone(),
            child_reputation: before.child.clone(),
        })
    }

    /// Store this tree under its root hash
    pub fn save(&self, storage: &dyn Storage) -> Result<H256> {
        let jrh = self.root_hash();
        storage.put_t(
            &justification_key(&jrh),
            &StoredJustification {
                leaves: self.leaves.clone(),
                bundles: self.bundles.clone(),
            },
        )?;
        log::debug!(
            "Saved justification tree {} with {} leaves",
            hex::encode(jrh),
            self.n_nodes()
        );

        Ok(jrh)
    }

    /// Load the tree stored under `jrh`
    pub fn load(storage: &dyn Storage, jrh: &H256) -> Result<Self> {
        let stored: StoredJustification = storage
            .get_t(&justification_key(jrh))?
            .ok_or(ReputationError::JustificationNotFound(*jrh))?;

        let mut tree = Self::new();
        for (leaf, bundle) in stored.leaves.into_iter().zip(stored.bundles) {
            tree.push(leaf, bundle);
        }
        let found = tree.root_hash();
        if found != *jrh {
            return Err(ReputationError::CorruptSnapshot {
                expected: *jrh,
                found,
            });
        }

        Ok(tree)
    }

    /// Delete the tree stored under `jrh`
    pub fn delete(storage: &dyn Storage, jrh: &H256) -> Result<()> {
        storage.delete(&justification_key(jrh))?;

        Ok(())
    }
}
