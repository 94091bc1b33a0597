//! Dispute submissions, as tracked by the arbiter, and the challenge response with its fixed
//! wire layout.

use ethereum_types::{H160, H256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use repminer_crypto::{
    hash::{h256_to_u256, u256_to_h256},
    proof::Proof,
};

use crate::{
    proof::{JustificationLeaf, JustificationProof, ReputationProof},
    reputation::{ReputationKey, KEY_LENGTH},
};

/// What a submitter claims about the result of a cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Root of the reputation trie after the whole log
    pub root_hash: H256,
    /// Number of keys in that trie
    pub n_nodes: u64,
    /// Root of the justification tree
    pub jrh: H256,
    /// Number of leaves in the justification tree
    pub jrh_n_nodes: u64,
}

/// Position of an entry in the tournament
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    /// Still competing in its round
    Live,
    /// Lost in its round
    Eliminated,
    /// Won its round and was copied into the next one
    Advanced,
}

/// State of one submission in one round of the dispute
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputedEntry {
    /// Every address that submitted this exact tuple
    pub submitters: Vec<H160>,
    pub submission: Submission,
    pub status: EntryStatus,
    /// Whether `confirmJustificationRootHash` succeeded for this entry
    pub jrh_confirmed: bool,
    /// Highest justification leaf index known to agree with the opponent
    pub lower_bound: u64,
    /// Lowest justification leaf index known to disagree with the opponent
    pub upper_bound: u64,
    /// Number of protocol calls completed, used to keep opponents in lockstep
    pub challenge_steps_completed: u64,
    /// Leaf revealed for the pending bisection target
    pub target_leaf: Option<(u64, JustificationLeaf)>,
    /// Leaf at `lower_bound`, once the bisection result is confirmed
    pub agreed_leaf: Option<JustificationLeaf>,
    /// Whether the challenge at `lower_bound` was answered successfully
    pub challenge_responded: bool,
    /// Arbiter time of the last accepted call for this entry
    pub last_response: u64,
}

impl DisputedEntry {
    /// Fresh entry for `submission`, as it enters a round
    pub fn new(submitter: H160, submission: Submission, now: u64) -> Self {
        DisputedEntry {
            submitters: vec![submitter],
            submission,
            status: EntryStatus::Live,
            jrh_confirmed: false,
            lower_bound: 0,
            upper_bound: submission.jrh_n_nodes.saturating_sub(1),
            challenge_steps_completed: 0,
            target_leaf: None,
            agreed_leaf: None,
            challenge_responded: false,
            last_response: now,
        }
    }

    /// The same submission entering the next round with its dispute progress reset
    pub fn advance(&self, now: u64) -> Self {
        DisputedEntry {
            submitters: self.submitters.clone(),
            ..DisputedEntry::new(H160::zero(), self.submission, now)
        }
    }

    pub fn is_live(&self) -> bool {
        self.status == EntryStatus::Live
    }

    /// Justification leaf index that the next bisection call reveals
    pub fn target(&self) -> u64 {
        self.lower_bound + (self.upper_bound - self.lower_bound) / 2
    }

    /// Whether the disagreement has been narrowed down to a single step
    pub fn bisection_complete(&self) -> bool {
        self.upper_bound - self.lower_bound <= 1
    }
}

/// Everything needed to prove that the step at `lower_bound` was computed correctly
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub round: u64,
    pub index: u64,
    /// Key written by the disputed step
    pub key: ReputationKey,
    /// State before the step, leaf `lower_bound` of the justification tree
    pub agree_state: JustificationProof,
    /// State after the step, leaf `lower_bound + 1`
    pub disagree_state: JustificationProof,
    /// `key` in the state before the step
    pub agree_reputation: ReputationProof,
    /// Value and uid of `key` after the step. They are proven with the siblings of
    /// `agree_reputation`, since the step writes nothing else.
    pub disagree_value: i128,
    pub disagree_uid: u64,
    /// Key holding the highest uid before the step, when the step creates a key
    pub newest_reputation: Option<ReputationProof>,
    /// User's reputation in the skill named by the log entry, for child skill steps
    pub origin_reputation: Option<ReputationProof>,
    /// User's reputation in the child skill, for child skill steps
    pub child_reputation: Option<ReputationProof>,
}

/// Number of numeric fields in the wire layout of a challenge response
pub const CHALLENGE_FIELDS: usize = 23;

/// Number of sibling arrays in the wire layout of a challenge response
pub const CHALLENGE_SIBLINGS: usize = 6;

/// Number of reputation keys, besides the disputed one, in the wire layout
pub const CHALLENGE_KEYS: usize = 3;

/// Challenge response as sent to the arbiter.
///
/// | field | meaning |
/// |-------|---------|
/// | 0, 1 | round, index |
/// | 2 | disputed step (`lower_bound`) |
/// | 3, 4, 5 | agree state root, nNodes, branch mask |
/// | 6, 7, 8 | disagree state root, nNodes, branch mask |
/// | 9 | reputation branch mask |
/// | 10, 11 | agree value, uid |
/// | 12, 13 | disagree value, uid |
/// | 14, 15, 16 | newest reputation branch mask, value, uid |
/// | 17, 18, 19 | origin reputation branch mask, value, uid |
/// | 20, 21, 22 | child reputation branch mask, value, uid |
///
/// Sibling arrays, in order: agree state, disagree state, reputation, newest, origin and child.
/// Proof keys, in order: newest, origin and child; an all-zero key means the proof is absent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeWire {
    pub fields: [U256; CHALLENGE_FIELDS],
    pub key: Vec<u8>,
    pub siblings: [Vec<H256>; CHALLENGE_SIBLINGS],
    pub proof_keys: [Vec<u8>; CHALLENGE_KEYS],
}

/// Errors decoding a `ChallengeWire`
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("reputation key must be 72 bytes long, found {0}")]
    KeyLength(usize),
    #[error("field {0} is out of range")]
    OutOfRange(usize),
}

fn u64_field(fields: &[U256; CHALLENGE_FIELDS], i: usize) -> Result<u64, WireError> {
    if fields[i] > U256::from(u64::MAX) {
        return Err(WireError::OutOfRange(i));
    }

    Ok(fields[i].low_u64())
}

fn value_field(fields: &[U256; CHALLENGE_FIELDS], i: usize) -> Result<i128, WireError> {
    if fields[i] > U256::from(i128::MAX.unsigned_abs()) {
        return Err(WireError::OutOfRange(i));
    }

    i128::try_from(fields[i].low_u128()).map_err(|_| WireError::OutOfRange(i))
}

fn value_word(value: i128) -> U256 {
    // Stored reputations are never negative
    U256::from(value.max(0).unsigned_abs())
}

fn key_from_wire(bytes: &[u8]) -> Result<ReputationKey, WireError> {
    ReputationKey::from_bytes(bytes).ok_or(WireError::KeyLength(bytes.len()))
}

impl ChallengeResponse {
    /// Encode into the fixed wire layout
    pub fn to_wire(&self) -> ChallengeWire {
        let mut fields = [U256::zero(); CHALLENGE_FIELDS];
        fields[0] = U256::from(self.round);
        fields[1] = U256::from(self.index);
        fields[2] = U256::from(self.agree_state.index);
        fields[3] = h256_to_u256(&self.agree_state.leaf.state_root);
        fields[4] = U256::from(self.agree_state.leaf.n_nodes);
        fields[5] = self.agree_state.proof.branch_mask;
        fields[6] = h256_to_u256(&self.disagree_state.leaf.state_root);
        fields[7] = U256::from(self.disagree_state.leaf.n_nodes);
        fields[8] = self.disagree_state.proof.branch_mask;
        fields[9] = self.agree_reputation.proof.branch_mask;
        fields[10] = value_word(self.agree_reputation.value);
        fields[11] = U256::from(self.agree_reputation.uid);
        fields[12] = value_word(self.disagree_value);
        fields[13] = U256::from(self.disagree_uid);

        let mut siblings: [Vec<H256>; CHALLENGE_SIBLINGS] = Default::default();
        siblings[0] = self.agree_state.proof.siblings.clone();
        siblings[1] = self.disagree_state.proof.siblings.clone();
        siblings[2] = self.agree_reputation.proof.siblings.clone();

        let mut proof_keys: [Vec<u8>; CHALLENGE_KEYS] = Default::default();
        let optional = [
            &self.newest_reputation,
            &self.origin_reputation,
            &self.child_reputation,
        ];
        for (i, proof) in optional.iter().enumerate() {
            let field = 14 + 3 * i;
            match proof {
                Some(proof) => {
                    fields[field] = proof.proof.branch_mask;
                    fields[field + 1] = value_word(proof.value);
                    fields[field + 2] = U256::from(proof.uid);
                    siblings[3 + i] = proof.proof.siblings.clone();
                    proof_keys[i] = proof.key.to_bytes().to_vec();
                }
                None => proof_keys[i] = vec![0; KEY_LENGTH],
            }
        }

        ChallengeWire {
            fields,
            key: self.key.to_bytes().to_vec(),
            siblings,
            proof_keys,
        }
    }
}

impl ChallengeWire {
    /// Decode the fixed wire layout
    pub fn decode(&self) -> Result<ChallengeResponse, WireError> {
        let f = &self.fields;
        let key = key_from_wire(&self.key)?;
        let step = u64_field(f, 2)?;

        let agree_state = JustificationProof {
            index: step,
            leaf: JustificationLeaf {
                state_root: u256_to_h256(&f[3]),
                n_nodes: u64_field(f, 4)?,
            },
            proof: Proof {
                branch_mask: f[5],
                siblings: self.siblings[0].clone(),
            },
        };
        let disagree_state = JustificationProof {
            index: step.saturating_add(1),
            leaf: JustificationLeaf {
                state_root: u256_to_h256(&f[6]),
                n_nodes: u64_field(f, 7)?,
            },
            proof: Proof {
                branch_mask: f[8],
                siblings: self.siblings[1].clone(),
            },
        };
        let agree_reputation = ReputationProof {
            key,
            value: value_field(f, 10)?,
            uid: u64_field(f, 11)?,
            proof: Proof {
                branch_mask: f[9],
                siblings: self.siblings[2].clone(),
            },
        };

        let mut optional: [Option<ReputationProof>; CHALLENGE_KEYS] = Default::default();
        for (i, slot) in optional.iter_mut().enumerate() {
            if self.proof_keys[i].iter().all(|b| *b == 0) {
                continue;
            }
            let field = 14 + 3 * i;
            *slot = Some(ReputationProof {
                key: key_from_wire(&self.proof_keys[i])?,
                value: value_field(f, field + 1)?,
                uid: u64_field(f, field + 2)?,
                proof: Proof {
                    branch_mask: f[field],
                    siblings: self.siblings[3 + i].clone(),
                },
            });
        }
        let [newest_reputation, origin_reputation, child_reputation] = optional;

        Ok(ChallengeResponse {
            round: u64_field(f, 0)?,
            index: u64_field(f, 1)?,
            key,
            agree_state,
            disagree_state,
            agree_reputation,
            disagree_value: value_field(f, 12)?,
            disagree_uid: u64_field(f, 13)?,
            newest_reputation,
            origin_reputation,
            child_reputation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repminer_crypto::hash::keccak256;

    fn key(user: u8) -> ReputationKey {
        ReputationKey::new(H160::repeat_byte(3), U256::from(4), H160::repeat_byte(user))
    }

    fn proof(seed: &[u8]) -> Proof {
        Proof {
            branch_mask: U256::from(0b11),
            siblings: vec![keccak256(seed), keccak256(&[seed, &b"x"[..]].concat())],
        }
    }

    fn response() -> ChallengeResponse {
        ChallengeResponse {
            round: 1,
            index: 3,
            key: key(1),
            agree_state: JustificationProof {
                index: 8,
                leaf: JustificationLeaf {
                    state_root: keccak256(b"agree"),
                    n_nodes: 5,
                },
                proof: proof(b"a"),
            },
            disagree_state: JustificationProof {
                index: 9,
                leaf: JustificationLeaf {
                    state_root: keccak256(b"disagree"),
                    n_nodes: 6,
                },
                proof: proof(b"d"),
            },
            agree_reputation: ReputationProof::absent(key(1), proof(b"r")),
            disagree_value: 1000,
            disagree_uid: 6,
            newest_reputation: Some(ReputationProof {
                key: key(2),
                value: 77,
                uid: 5,
                proof: proof(b"n"),
            }),
            origin_reputation: None,
            child_reputation: None,
        }
    }

    #[test]
    fn wire_layout() {
        let wire = response().to_wire();
        assert_eq!(wire.fields[2], U256::from(8));
        assert_eq!(wire.fields[7], U256::from(6));
        assert_eq!(wire.fields[12], U256::from(1000));
        assert_eq!(wire.fields[16], U256::from(5));
        assert_eq!(wire.fields[17], U256::zero());
        assert_eq!(wire.key.len(), KEY_LENGTH);
        assert!(wire.siblings[4].is_empty());
        assert_eq!(wire.proof_keys[1], vec![0; KEY_LENGTH]);

        assert_eq!(wire.decode(), Ok(response()));
    }

    #[test]
    fn decoding_checks_ranges() {
        let mut wire = response().to_wire();
        wire.fields[11] = U256::MAX;
        assert_eq!(wire.decode(), Err(WireError::OutOfRange(11)));

        let mut wire = response().to_wire();
        wire.fields[12] = U256::from(i128::MAX.unsigned_abs()) + 1;
        assert_eq!(wire.decode(), Err(WireError::OutOfRange(12)));

        let mut wire = response().to_wire();
        wire.key.pop();
        assert_eq!(wire.decode(), Err(WireError::KeyLength(KEY_LENGTH - 1)));
    }

    #[test]
    fn bisection_bounds() {
        let submission = Submission {
            jrh_n_nodes: 11,
            ..Default::default()
        };
        let mut entry = DisputedEntry::new(H160::repeat_byte(1), submission, 0);
        assert_eq!((entry.lower_bound, entry.upper_bound), (0, 10));
        assert_eq!(entry.target(), 5);
        entry.lower_bound = 9;
        assert!(entry.bisection_complete());

        let next = entry.advance(7);
        assert_eq!(next.lower_bound, 0);
        assert_eq!(next.submitters, entry.submitters);
        assert_eq!(next.last_response, 7);
    }
}
