//! Arbiter interface
//!
//! The arbiter is the only synchronisation point between miners. Every call is a blocking round
//! trip that either takes effect atomically or reverts with a reason and no side effects.

use ethereum_types::{H160, H256};
use serde::{Deserialize, Serialize};

use repminer_data_structures::{
    dispute::{ChallengeWire, DisputedEntry, Submission},
    proof::{JustificationLeaf, JustificationProof},
    reputation::Clamp,
};

use crate::error::ArbiterResult;

/// Result of a challenge response that passed every structural check
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeOutcome {
    /// The claimed value is what the step computes. `clamp` tells whether the computed value
    /// was out of range.
    Accepted { clamp: Clamp },
    /// The claimed value, uid or node count is wrong. The submission is out of the tournament.
    Eliminated { reason: String },
}

/// Where a submitter currently stands in the tournament
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Position {
    pub round: u64,
    pub index: u64,
    pub entry: DisputedEntry,
}

impl Position {
    /// Index of the opponent in the same round
    pub fn opponent_index(&self) -> u64 {
        self.index ^ 1
    }
}

/// Snapshot of the arbiter state relevant to the current cycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleStatus {
    /// Arbiter clock, in seconds
    pub now: u64,
    pub submission_window_closed: bool,
    /// Time an entry has to act before its opponent can invalidate it
    pub response_window: u64,
    /// Number of entries in every round
    pub round_lengths: Vec<u64>,
    /// Number of leading rounds without live entries
    pub rounds_complete: u64,
    /// State every justification tree must start from
    pub accepted: JustificationLeaf,
    /// Root confirmed for this cycle, if any
    pub confirmed: Option<H256>,
}

impl CycleStatus {
    /// Whether nothing can change in the rounds before `round` any more
    pub fn earlier_rounds_complete(&self, round: u64) -> bool {
        self.submission_window_closed && self.rounds_complete >= round
    }

    pub fn round_len(&self, round: u64) -> u64 {
        usize::try_from(round)
            .ok()
            .and_then(|round| self.round_lengths.get(round))
            .copied()
            .unwrap_or(0)
    }

    /// Whether `round` is the last round so far
    pub fn is_last_round(&self, round: u64) -> bool {
        round + 1 == self.round_lengths.len() as u64
    }
}

/// Calls exposed by the arbiter of the reputation mining cycle
pub trait Arbiter {
    fn status(&self) -> ArbiterResult<CycleStatus>;

    /// Entry at `index` of `round`, if any
    fn entry(&self, round: u64, index: u64) -> ArbiterResult<Option<DisputedEntry>>;

    /// Latest position of `submitter`
    fn find_submission(&self, submitter: &H160) -> ArbiterResult<Option<Position>>;

    /// Publish the result of a replay
    fn submit_root_hash(&self, submitter: H160, submission: Submission) -> ArbiterResult<()>;

    /// Prove that the justification tree starts at the accepted state and ends at the
    /// submitted one
    fn confirm_justification_root_hash(
        &self,
        round: u64,
        index: u64,
        first: &JustificationProof,
        last: &JustificationProof,
    ) -> ArbiterResult<()>;

    /// Reveal the justification leaf at the current bisection target
    fn respond_to_binary_search(
        &self,
        round: u64,
        index: u64,
        proof: &JustificationProof,
    ) -> ArbiterResult<()>;

    /// Reveal the last agreed leaf once the bisection is down to a single step
    fn confirm_binary_search_result(
        &self,
        round: u64,
        index: u64,
        proof: &JustificationProof,
    ) -> ArbiterResult<()>;

    /// Prove the disputed step. Round and index travel inside the wire tuple.
    fn respond_to_challenge(&self, response: &ChallengeWire) -> ArbiterResult<ChallengeOutcome>;

    /// Eliminate a stalled entry, or give a bye to an entry without opponent
    fn invalidate_hash(&self, round: u64, index: u64) -> ArbiterResult<()>;

    /// Accept the sole survivor of the final round, returning its root hash
    fn confirm_new_hash(&self, round: u64) -> ArbiterResult<H256>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(round_lengths: Vec<u64>, rounds_complete: u64, closed: bool) -> CycleStatus {
        CycleStatus {
            now: 0,
            submission_window_closed: closed,
            response_window: 10,
            round_lengths,
            rounds_complete,
            accepted: JustificationLeaf::default(),
            confirmed: None,
        }
    }

    #[test]
    fn earlier_rounds() {
        assert!(!status(vec![2], 0, false).earlier_rounds_complete(0));
        assert!(status(vec![2], 0, true).earlier_rounds_complete(0));
        assert!(!status(vec![2, 1], 0, true).earlier_rounds_complete(1));
        assert!(status(vec![2, 1], 1, true).earlier_rounds_complete(1));
    }

    #[test]
    fn round_lengths() {
        let status = status(vec![3, 1], 0, true);
        assert_eq!(status.round_len(0), 3);
        assert_eq!(status.round_len(5), 0);
        assert!(status.is_last_round(1));
        assert!(!status.is_last_round(0));
    }
}
