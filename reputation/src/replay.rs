//! Update log replay
//!
//! Applies one cycle of the update log over an accepted state. The start state is never
//! modified: the replay works on a clone and returns the final state with the justification tree
//! recording every intermediate one. Any error discards the whole replay.

use ethereum_types::H256;

use repminer_data_structures::{
    log_entry::LogEntry,
    proof::JustificationLeaf,
    reputation::{Clamp, DecayRate, ReputationKey, ReputationValue},
    skill::SkillTree,
};

use crate::{
    error::{ReputationError, Result},
    fault::{FaultInjector, Write},
    justification::{JustificationTree, ProofBundle},
    state::ReputationStateStore,
    update::{CyclePlan, UpdateKind, UpdateStep},
};

/// A step whose computed value had to be clamped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClampedStep {
    pub step: u64,
    /// Key written by the step
    pub key: ReputationKey,
    /// Bound the value was clamped to
    pub clamp: Clamp,
}

/// Result of replaying one cycle
#[derive(Clone, Debug)]
pub struct Replay {
    /// State after the last step
    pub state: ReputationStateStore,
    /// Every intermediate state, leaf 0 being the starting one
    pub justification: JustificationTree,
    /// Steps where the clamp policy applied, in step order
    pub clamped: Vec<ClampedStep>,
}

impl Replay {
    /// Root hash of the final state
    pub fn root_hash(&self) -> H256 {
        self.state.root_hash()
    }

    /// Number of reputations in the final state
    pub fn n_nodes(&self) -> u64 {
        self.state.n_nodes()
    }

    /// Justification root hash
    pub fn jrh(&self) -> H256 {
        self.justification.root_hash()
    }

    /// Number of justification leaves, one more than the number of steps
    pub fn jrh_n_nodes(&self) -> u64 {
        self.justification.n_nodes()
    }
}

/// Deterministic replayer of the update log
#[derive(Clone, Debug)]
pub struct UpdateLogReplayer {
    decay: DecayRate,
    skills: SkillTree,
}

impl UpdateLogReplayer {
    pub fn new(decay: DecayRate, skills: SkillTree) -> Self {
        UpdateLogReplayer { decay, skills }
    }

    /// Build a replayer from a raw decay factor
    pub fn with_decay(numerator: u64, denominator: u64, skills: SkillTree) -> Result<Self> {
        let decay = DecayRate::new(numerator, denominator).ok_or(
            ReputationError::InvalidDecayRate {
                numerator,
                denominator,
            },
        )?;

        Ok(Self::new(decay, skills))
    }

    pub fn decay(&self) -> &DecayRate {
        &self.decay
    }

    pub fn skills(&self) -> &SkillTree {
        &self.skills
    }

    /// Replay `entries` over `start`, writing what `fault` decides at every step
    pub fn replay(
        &self,
        start: &ReputationStateStore,
        entries: &[LogEntry],
        fault: &dyn FaultInjector,
    ) -> Result<Replay> {
        let plan = CyclePlan::new(start.n_nodes(), entries, &self.skills)?;
        log::info!(
            "Replaying {} log entries over state {} ({} reputations): {} steps",
            entries.len(),
            hex::encode(start.root_hash()),
            start.n_nodes(),
            plan.total_steps()
        );

        let mut state = start.clone();
        let mut justification = JustificationTree::new();
        let mut clamped = vec![];
        let mut previous_key: Option<ReputationKey> = None;

        for step in plan.steps() {
            let key = match step {
                UpdateStep::Decay { uid, .. } => state
                    .key_by_uid(uid)
                    .ok_or(ReputationError::UnknownUid(uid))?,
                UpdateStep::Update { key, .. } => key,
            };
            let before = state.find(&key);

            let mut bundle = ProofBundle {
                just_updated: previous_key.map(|key| state.get_proof(&key)),
                next_update: Some(state.get_proof(&key)),
                ..ProofBundle::default()
            };
            if before.is_none() && state.n_nodes() > 0 {
                bundle.newest = state
                    .key_by_uid(state.n_nodes())
                    .map(|newest| state.get_proof(&newest));
            }
            let (origin, child) = match step {
                UpdateStep::Update {
                    kind: UpdateKind::Child { origin, child },
                    ..
                } => {
                    bundle.origin = Some(state.get_proof(&origin));
                    bundle.child = Some(state.get_proof(&child));
                    (state.value_or_zero(&origin), state.value_or_zero(&child))
                }
                _ => (0, 0),
            };
            justification.push(leaf_of(&state), bundle);

            let old = before.map(|reputation| reputation.value).unwrap_or(0);
            let computed = step.apply(&self.decay, old, origin, child);
            if computed.clamp != Clamp::None {
                clamped.push(ClampedStep {
                    step: step.index(),
                    key,
                    clamp: computed.clamp,
                });
            }

            let honest = ReputationValue {
                value: computed.value,
                uid: before
                    .map(|reputation| reputation.uid)
                    .unwrap_or(state.highest_uid() + 1),
            };
            let written = fault.apply(&Write {
                step: step.index(),
                key,
                value: honest,
                created: before.is_none(),
            });
            if written != honest {
                log::debug!(
                    "Step {}: writing {:?} to {} instead of {:?}",
                    step.index(),
                    written,
                    key,
                    honest
                );
            }
            log::trace!(
                "Step {}: {} {} -> {} (uid {})",
                step.index(),
                key,
                old,
                written.value,
                written.uid
            );
            state.insert(key, written.value, written.uid)?;
            previous_key = Some(key);
        }

        justification.push(
            leaf_of(&state),
            ProofBundle {
                just_updated: previous_key.map(|key| state.get_proof(&key)),
                ..ProofBundle::default()
            },
        );

        log::info!(
            "Replay finished: state {} ({} reputations), justification {} ({} leaves)",
            hex::encode(state.root_hash()),
            state.n_nodes(),
            hex::encode(justification.root_hash()),
            justification.n_nodes()
        );

        Ok(Replay {
            state,
            justification,
            clamped,
        })
    }
}

fn leaf_of(state: &ReputationStateStore) -> JustificationLeaf {
    JustificationLeaf {
        state_root: state.root_hash(),
        n_nodes: state.n_nodes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{ExtraReputation, Honest};
    use ethereum_types::{H160, U256};

    fn replayer() -> UpdateLogReplayer {
        let mut skills = SkillTree::new();
        skills.add_root(U256::from(1)).unwrap();
        skills.add_skill(U256::from(2), U256::from(1)).unwrap();
        UpdateLogReplayer::with_decay(1, 2, skills).unwrap()
    }

    fn award(amount: i128, n_previous_updates: u64) -> LogEntry {
        LogEntry {
            user: H160::repeat_byte(1),
            colony: H160::repeat_byte(0xc0),
            skill_id: U256::from(2),
            amount,
            n_updates: 4,
            n_previous_updates,
        }
    }

    #[test]
    fn invalid_decay_is_rejected() {
        assert!(matches!(
            UpdateLogReplayer::with_decay(3, 2, SkillTree::new()),
            Err(ReputationError::InvalidDecayRate {
                numerator: 3,
                denominator: 2
            })
        ));
    }

    #[test]
    fn start_state_is_untouched() {
        let start = ReputationStateStore::new();
        let replay = replayer().replay(&start, &[award(10, 0)], &Honest).unwrap();
        assert_eq!(start.n_nodes(), 0);
        assert_eq!(replay.n_nodes(), 4);
        assert_eq!(replay.jrh_n_nodes(), 5);
        assert_eq!(
            replay.justification.leaf(0).unwrap().state_root,
            start.root_hash()
        );
        assert_eq!(
            replay.justification.last_leaf().unwrap().state_root,
            replay.root_hash()
        );
    }

    #[test]
    fn empty_cycle_has_a_single_leaf() {
        let start = ReputationStateStore::new();
        let replay = replayer().replay(&start, &[], &Honest).unwrap();
        assert_eq!(replay.jrh_n_nodes(), 1);
        assert_eq!(replay.root_hash(), start.root_hash());
    }

    #[test]
    fn bundles_answer_every_step() {
        let first = replayer()
            .replay(&ReputationStateStore::new(), &[award(10, 0)], &Honest)
            .unwrap();
        let second = replayer()
            .replay(&first.state, &[award(-3, 0)], &Honest)
            .unwrap();
        let justification = &second.justification;

        for step in 0..justification.n_nodes() - 1 {
            let response = justification.challenge_response(0, 0, step).unwrap();
            let agree_root = response.agree_state.leaf.state_root;
            let disagree_root = response.disagree_state.leaf.state_root;
            assert!(response.agree_reputation.verify(&agree_root));

            let mut written = response.agree_reputation.clone();
            written.value = response.disagree_value;
            written.uid = response.disagree_uid;
            assert!(written.verify(&disagree_root));
        }
    }

    #[test]
    fn faults_change_the_root() {
        let start = ReputationStateStore::new();
        let honest = replayer().replay(&start, &[award(10, 0)], &Honest).unwrap();
        let faulty = replayer()
            .replay(
                &start,
                &[award(10, 0)],
                &ExtraReputation { step: 1, amount: 1 },
            )
            .unwrap();
        assert_ne!(honest.root_hash(), faulty.root_hash());
        assert_eq!(
            honest.justification.leaf(1),
            faulty.justification.leaf(1)
        );
        assert_ne!(
            honest.justification.leaf(2),
            faulty.justification.leaf(2)
        );
    }
}
