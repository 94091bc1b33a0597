//! Expansion of the update log into single-write steps.
//!
//! A cycle starts with one decay step per key of the starting state, in uid order. Then every
//! log entry expands into `nUpdates` steps: half for the colony-wide aggregate and half for the
//! user, each half writing the child skills (negative amounts only), then the named skill, then
//! every ancestor from the direct parent to the root.

use ethereum_types::{H160, U256};

use repminer_data_structures::{
    log_entry::LogEntry,
    reputation::{add_amount, child_delta, ClampedValue, DecayRate, ReputationKey},
    skill::SkillTree,
};

use crate::error::{ReputationError, Result};

/// What a step does to the key it writes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateKind {
    /// Reduce a child skill in proportion to the loss in the parent
    Child {
        /// User's reputation in the skill named by the entry
        origin: ReputationKey,
        /// User's reputation in the child skill
        child: ReputationKey,
    },
    /// Add the amount to the skill named by the entry
    Skill,
    /// Add the amount to an ancestor of the skill named by the entry
    Ancestor,
}

/// One single-write step of a cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateStep {
    /// Decay the key that was created with `uid`
    Decay { index: u64, uid: u64 },
    /// Apply part of log entry `entry` to `key`
    Update {
        index: u64,
        entry: usize,
        key: ReputationKey,
        kind: UpdateKind,
        amount: i128,
    },
}

impl UpdateStep {
    /// Position of this step in the cycle
    pub fn index(&self) -> u64 {
        match self {
            UpdateStep::Decay { index, .. } | UpdateStep::Update { index, .. } => *index,
        }
    }

    /// Compute the value written by this step from the values in the state before the step.
    /// `origin` and `child` are only used by child skill steps.
    pub fn apply(&self, decay: &DecayRate, old: i128, origin: i128, child: i128) -> ClampedValue {
        match self {
            UpdateStep::Decay { .. } => ClampedValue::exact(decay.apply(old)),
            UpdateStep::Update {
                kind: UpdateKind::Child { .. },
                amount,
                ..
            } => add_amount(old, child_delta(*amount, origin, child)),
            UpdateStep::Update { amount, .. } => add_amount(old, *amount),
        }
    }
}

#[derive(Clone, Debug)]
struct Expansion {
    first_step: u64,
    half: u64,
    children: Vec<U256>,
    ancestors: Vec<U256>,
}

/// Every step of one cycle, derived from the starting node count, the log and the skill tree
#[derive(Clone, Debug)]
pub struct CyclePlan {
    n_decays: u64,
    entries: Vec<LogEntry>,
    expansions: Vec<Expansion>,
}

fn malformed(entry: usize, reason: String) -> ReputationError {
    ReputationError::MalformedLog { entry, reason }
}

impl CyclePlan {
    /// Check the log against the skill tree and lay out its steps after `n_nodes` decays
    pub fn new(n_nodes: u64, entries: &[LogEntry], skills: &SkillTree) -> Result<Self> {
        let mut expansions = Vec::with_capacity(entries.len());
        let mut previous_updates = 0u64;

        for (i, entry) in entries.iter().enumerate() {
            if entry.n_previous_updates != previous_updates {
                return Err(malformed(
                    i,
                    format!(
                        "nPreviousUpdates is {} but the previous entries add up to {}",
                        entry.n_previous_updates, previous_updates
                    ),
                ));
            }
            if entry.n_updates == 0 || entry.n_updates % 2 != 0 {
                return Err(malformed(
                    i,
                    format!("nUpdates must be even and positive, found {}", entry.n_updates),
                ));
            }
            if entry.colony == H160::zero() {
                return Err(malformed(i, "colony address is zero".to_string()));
            }

            let ancestors = skills
                .ancestors(&entry.skill_id)
                .map_err(|e| malformed(i, e.to_string()))?;
            let half = entry.n_updates / 2;
            let n_children = half
                .checked_sub(1 + ancestors.len() as u64)
                .ok_or_else(|| {
                    malformed(
                        i,
                        format!(
                            "nUpdates {} cannot cover skill {} and its {} ancestors",
                            entry.n_updates,
                            entry.skill_id,
                            ancestors.len()
                        ),
                    )
                })?;
            let children = if n_children == 0 {
                vec![]
            } else {
                if entry.amount >= 0 {
                    return Err(malformed(
                        i,
                        format!("{} child updates for a non-negative amount", n_children),
                    ));
                }
                let descendants = skills
                    .descendants(&entry.skill_id)
                    .map_err(|e| malformed(i, e.to_string()))?;
                if (descendants.len() as u64) < n_children {
                    return Err(malformed(
                        i,
                        format!(
                            "{} child updates but skill {} only has {} descendants",
                            n_children,
                            entry.skill_id,
                            descendants.len()
                        ),
                    ));
                }
                descendants.into_iter().take(n_children as usize).collect()
            };

            expansions.push(Expansion {
                first_step: n_nodes.saturating_add(previous_updates),
                half,
                children,
                ancestors,
            });
            previous_updates = previous_updates
                .checked_add(entry.n_updates)
                .ok_or_else(|| malformed(i, "update count overflows".to_string()))?;
        }

        n_nodes
            .checked_add(previous_updates)
            .ok_or_else(|| malformed(entries.len(), "update count overflows".to_string()))?;

        Ok(CyclePlan {
            n_decays: n_nodes,
            entries: entries.to_vec(),
            expansions,
        })
    }

    /// Number of decay steps
    pub fn n_decays(&self) -> u64 {
        self.n_decays
    }

    /// Number of steps in the cycle
    pub fn total_steps(&self) -> u64 {
        self.n_decays
            + self
                .entries
                .last()
                .map(|entry| entry.n_previous_updates + entry.n_updates)
                .unwrap_or(0)
    }

    /// Log entries of the cycle
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Step number `index`, or `None` past the end of the cycle
    pub fn step(&self, index: u64) -> Option<UpdateStep> {
        if index < self.n_decays {
            return Some(UpdateStep::Decay {
                index,
                uid: index + 1,
            });
        }
        if index >= self.total_steps() {
            return None;
        }

        let position = self
            .expansions
            .partition_point(|expansion| expansion.first_step <= index);
        let entry_index = position.checked_sub(1)?;
        let entry = &self.entries[entry_index];
        let expansion = &self.expansions[entry_index];

        let offset = index - expansion.first_step;
        let user = if offset < expansion.half {
            H160::zero()
        } else {
            entry.user
        };
        let within = (offset % expansion.half) as usize;
        let n_children = expansion.children.len();

        let (skill_id, kind) = if within < n_children {
            let child_skill = expansion.children[within];
            let origin = entry.user_key();
            (
                child_skill,
                UpdateKind::Child {
                    origin,
                    child: origin.with_skill(child_skill),
                },
            )
        } else if within == n_children {
            (entry.skill_id, UpdateKind::Skill)
        } else {
            (
                *expansion.ancestors.get(within - n_children - 1)?,
                UpdateKind::Ancestor,
            )
        };

        Some(UpdateStep::Update {
            index,
            entry: entry_index,
            key: ReputationKey::new(entry.colony, skill_id, user),
            kind,
            amount: entry.amount,
        })
    }

    /// Every step, in order
    pub fn steps(&self) -> impl Iterator<Item = UpdateStep> + '_ {
        (0..self.total_steps()).filter_map(move |index| self.step(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn colony() -> H160 {
        H160::repeat_byte(0xc0)
    }

    fn worker() -> H160 {
        H160::repeat_byte(0x01)
    }

    // 1 <- 2 <- 3
    fn skills() -> SkillTree {
        let mut skills = SkillTree::new();
        skills.add_root(U256::from(1)).unwrap();
        skills.add_skill(U256::from(2), U256::from(1)).unwrap();
        skills.add_skill(U256::from(3), U256::from(2)).unwrap();
        skills
    }

    fn entry(skill: u64, amount: i128, n_updates: u64, n_previous_updates: u64) -> LogEntry {
        LogEntry {
            user: worker(),
            colony: colony(),
            skill_id: U256::from(skill),
            amount,
            n_updates,
            n_previous_updates,
        }
    }

    fn key(skill: u64, user: H160) -> ReputationKey {
        ReputationKey::new(colony(), U256::from(skill), user)
    }

    #[test]
    fn positive_entry_expansion() {
        let plan = CyclePlan::new(2, &[entry(2, 100, 4, 0)], &skills()).unwrap();
        assert_eq!(plan.total_steps(), 6);
        assert_eq!(plan.step(0), Some(UpdateStep::Decay { index: 0, uid: 1 }));
        assert_eq!(plan.step(1), Some(UpdateStep::Decay { index: 1, uid: 2 }));

        let keys: Vec<(ReputationKey, UpdateKind)> = plan
            .steps()
            .filter_map(|step| match step {
                UpdateStep::Update { key, kind, .. } => Some((key, kind)),
                UpdateStep::Decay { .. } => None,
            })
            .collect();
        assert_eq!(
            keys,
            vec![
                (key(2, H160::zero()), UpdateKind::Skill),
                (key(1, H160::zero()), UpdateKind::Ancestor),
                (key(2, worker()), UpdateKind::Skill),
                (key(1, worker()), UpdateKind::Ancestor),
            ]
        );
        assert_eq!(plan.step(6), None);
    }

    #[test]
    fn negative_entry_expansion() {
        // Skill 2 has one parent and one descendant
        let plan = CyclePlan::new(0, &[entry(2, -10, 6, 0)], &skills()).unwrap();
        let steps: Vec<UpdateStep> = plan.steps().collect();
        assert_eq!(steps.len(), 6);
        assert_eq!(
            steps[0],
            UpdateStep::Update {
                index: 0,
                entry: 0,
                key: key(3, H160::zero()),
                kind: UpdateKind::Child {
                    origin: key(2, worker()),
                    child: key(3, worker()),
                },
                amount: -10,
            }
        );
        assert!(matches!(
            steps[3],
            UpdateStep::Update {
                kind: UpdateKind::Child { .. },
                ..
            }
        ));
        assert!(matches!(
            steps[5],
            UpdateStep::Update {
                kind: UpdateKind::Ancestor,
                ..
            }
        ));
    }

    #[test]
    fn negative_entry_may_skip_children() {
        // Children created after the entry was logged are not counted
        let plan = CyclePlan::new(0, &[entry(2, -10, 4, 0)], &skills()).unwrap();
        assert!(plan.steps().all(|step| !matches!(
            step,
            UpdateStep::Update {
                kind: UpdateKind::Child { .. },
                ..
            }
        )));
    }

    #[test]
    fn entries_follow_each_other() {
        let plan = CyclePlan::new(
            1,
            &[entry(1, 5, 2, 0), entry(3, 5, 6, 2), entry(2, 5, 4, 8)],
            &skills(),
        )
        .unwrap();
        assert_eq!(plan.total_steps(), 13);
        assert!(matches!(plan.step(3), Some(UpdateStep::Update { entry: 1, .. })));
        assert!(matches!(plan.step(9), Some(UpdateStep::Update { entry: 2, .. })));
        assert_eq!(plan.steps().count(), 13);
    }

    #[test]
    fn malformed_logs() {
        let cases = vec![
            vec![entry(1, 5, 2, 1)],
            vec![entry(1, 5, 3, 0)],
            vec![entry(3, 5, 2, 0)],
            vec![entry(2, 5, 6, 0)],
            vec![entry(3, -5, 8, 0)],
            vec![entry(9, 5, 2, 0)],
            vec![entry(1, 5, 2, 0), entry(1, 5, 2, 0)],
        ];
        for log in cases {
            assert!(
                matches!(
                    CyclePlan::new(0, &log, &skills()),
                    Err(ReputationError::MalformedLog { .. })
                ),
                "{:?}",
                log
            );
        }
    }

    #[test]
    fn step_arithmetic() {
        let decay = DecayRate::new(1, 2).unwrap();
        let plan = CyclePlan::new(1, &[entry(2, -10, 6, 0)], &skills()).unwrap();
        let decay_step = plan.step(0).unwrap();
        assert_eq!(decay_step.apply(&decay, 9, 0, 0).value, 4);

        let child_step = plan.step(1).unwrap();
        // Losing 10 out of 40 in the parent removes a quarter of the child
        assert_eq!(child_step.apply(&decay, 100, 40, 20).value, 95);

        let skill_step = plan.step(2).unwrap();
        let clamped = skill_step.apply(&decay, 4, 0, 0);
        assert_eq!(clamped.value, 0);
        assert_eq!(
            clamped.clamp,
            repminer_data_structures::reputation::Clamp::ToZero
        );
    }
}
