#![allow(dead_code)]

use std::sync::Arc;

use ethereum_types::{H160, U256};

use repminer_data_structures::{
    dispute::Submission, log_entry::LogEntry, proof::JustificationLeaf, skill::SkillTree,
};
use repminer_dispute::{
    engine::{DisputeEngine, Phase},
    local::{LocalArbiter, Windows},
    retry::RetryPolicy,
};
use repminer_reputation::{
    fault::{FaultInjector, Honest},
    replay::Replay,
    ReputationStateStore, UpdateLogReplayer,
};
use repminer_storage::backends::hashmap;

pub const WORKER: u8 = 0x01;
pub const OTHER: u8 = 0x02;

pub const SUBMISSION_WINDOW: u64 = 100;
pub const RESPONSE_WINDOW: u64 = 10;

pub type Engine = DisputeEngine<LocalArbiter, hashmap::Backend>;

pub fn colony() -> H160 {
    H160::repeat_byte(0xc0)
}

pub fn user(byte: u8) -> H160 {
    H160::repeat_byte(byte)
}

pub fn miner(byte: u8) -> H160 {
    H160::from_low_u64_be(0x1000 + u64::from(byte))
}

// 1 <- 2 <- 3
//      ^--- 4
pub fn skills() -> SkillTree {
    let mut skills = SkillTree::new();
    skills.add_root(U256::from(1)).unwrap();
    skills.add_skill(U256::from(2), U256::from(1)).unwrap();
    skills.add_skill(U256::from(3), U256::from(2)).unwrap();
    skills.add_skill(U256::from(4), U256::from(2)).unwrap();
    skills
}

/// Consistent log from `(user, skill, amount, number of children)` tuples
pub fn log(entries: &[(u8, u64, i128, u64)]) -> Vec<LogEntry> {
    let skills = skills();
    let mut previous = 0;
    entries
        .iter()
        .map(|&(who, skill, amount, n_children)| {
            let n_parents = skills.ancestors(&U256::from(skill)).unwrap().len() as u64;
            let n_updates = 2 * (1 + n_parents + n_children);
            let entry = LogEntry {
                user: user(who),
                colony: colony(),
                skill_id: U256::from(skill),
                amount,
                n_updates,
                n_previous_updates: previous,
            };
            previous += n_updates;
            entry
        })
        .collect()
}

/// An accepted state and the log of the cycle being disputed
pub struct Fixture {
    pub replayer: UpdateLogReplayer,
    pub accepted: ReputationStateStore,
    pub entries: Vec<LogEntry>,
}

impl Fixture {
    pub fn new(previous: &[(u8, u64, i128, u64)], current: &[(u8, u64, i128, u64)]) -> Self {
        let replayer = UpdateLogReplayer::with_decay(9, 10, skills()).unwrap();
        let accepted = replayer
            .replay(&ReputationStateStore::new(), &log(previous), &Honest)
            .unwrap()
            .state;

        Fixture {
            replayer,
            accepted,
            entries: log(current),
        }
    }

    /// Six reputations accepted, then a gain, a loss with two children and a new user:
    ///
    /// | steps | writes |
    /// |-------|--------|
    /// | 0..6 | decay |
    /// | 6..12 | +50 in skill 3 |
    /// | 12..20 | -70 in skill 2, children 3 and 4 first (13 and 17 create skill 4) |
    /// | 20, 21 | +30 in skill 1 for a new user (21 creates it) |
    pub fn standard() -> Self {
        Fixture::new(
            &[(WORKER, 2, 100, 0), (WORKER, 3, 40, 0)],
            &[(WORKER, 3, 50, 0), (WORKER, 2, -70, 2), (OTHER, 1, 30, 0)],
        )
    }

    pub fn replay(&self, fault: &dyn FaultInjector) -> Replay {
        self.replayer
            .replay(&self.accepted, &self.entries, fault)
            .unwrap()
    }

    pub fn accepted_leaf(&self) -> JustificationLeaf {
        JustificationLeaf {
            state_root: self.accepted.root_hash(),
            n_nodes: self.accepted.n_nodes(),
        }
    }

    pub fn arbiter(&self) -> Arc<LocalArbiter> {
        Arc::new(
            LocalArbiter::new(
                self.accepted_leaf(),
                &self.entries,
                self.replayer.skills(),
                *self.replayer.decay(),
                Windows {
                    submission: SUBMISSION_WINDOW,
                    response: RESPONSE_WINDOW,
                },
            )
            .unwrap(),
        )
    }

    /// Engine of `miner(who)` with its own storage, ready to submit the result of `fault`
    pub fn engine(&self, arbiter: &Arc<LocalArbiter>, who: u8, fault: &dyn FaultInjector) -> Engine {
        self.engine_with_storage(arbiter, Arc::new(hashmap::Backend::default()), who, fault)
    }

    pub fn engine_with_storage(
        &self,
        arbiter: &Arc<LocalArbiter>,
        storage: Arc<hashmap::Backend>,
        who: u8,
        fault: &dyn FaultInjector,
    ) -> Engine {
        let mut engine =
            DisputeEngine::new(arbiter.clone(), storage, miner(who), RetryPolicy::new(1, 0));
        engine.prepare(&self.replay(fault)).unwrap();
        engine
    }
}

pub fn submission(replay: &Replay) -> Submission {
    Submission {
        root_hash: replay.root_hash(),
        n_nodes: replay.n_nodes(),
        jrh: replay.jrh(),
        jrh_n_nodes: replay.jrh_n_nodes(),
    }
}

pub fn close_submission_window(arbiter: &LocalArbiter) {
    arbiter.advance_time(SUBMISSION_WINDOW).unwrap();
}

/// Step both engines until both have confirmed the bisection result
pub fn run_to_challenge(a: &mut Engine, b: &mut Engine) {
    for _ in 0..200 {
        if a.phase() == Phase::BisectionConfirmed && b.phase() == Phase::BisectionConfirmed {
            return;
        }
        if a.phase() != Phase::BisectionConfirmed {
            a.step().unwrap();
        }
        if b.phase() != Phase::BisectionConfirmed {
            b.step().unwrap();
        }
    }
    panic!("bisection did not finish");
}
