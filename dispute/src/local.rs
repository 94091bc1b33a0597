//! In-memory arbiter
//!
//! Applies the same rules as the on-chain mining cycle to a single cycle held in memory, with a
//! logical clock that only moves when told to. Used to simulate disputes between several
//! miners and to test the dispute engine.

use std::{
    cmp::Ordering,
    sync::{Mutex, MutexGuard},
};

use ethereum_types::{H160, H256};

use repminer_data_structures::{
    dispute::{ChallengeResponse, ChallengeWire, DisputedEntry, EntryStatus, Submission},
    log_entry::LogEntry,
    proof::{JustificationLeaf, JustificationProof, ReputationProof},
    reputation::DecayRate,
    skill::SkillTree,
};
use repminer_reputation::{
    error::ReputationError,
    update::{CyclePlan, UpdateKind, UpdateStep},
};

use crate::{
    arbiter::{Arbiter, ChallengeOutcome, CycleStatus, Position},
    error::{ArbiterError, ArbiterResult},
};

/// Phase durations, in seconds of the arbiter clock
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Windows {
    /// Time from the start of the cycle during which submissions are accepted
    pub submission: u64,
    /// Time an entry has to act before a stalled opponent can be invalidated
    pub response: u64,
}

fn revert<T>(reason: &str) -> ArbiterResult<T> {
    Err(ArbiterError::Reverted(reason.to_string()))
}

fn slot(round: u64, index: u64) -> Option<(usize, usize)> {
    Some((usize::try_from(round).ok()?, usize::try_from(index).ok()?))
}

#[derive(Debug)]
struct Cycle {
    clock: u64,
    window_closes: u64,
    accepted: JustificationLeaf,
    plan: CyclePlan,
    rounds: Vec<Vec<DisputedEntry>>,
    confirmed: Option<H256>,
}

impl Cycle {
    fn window_closed(&self) -> bool {
        self.clock >= self.window_closes
    }

    fn rounds_complete(&self) -> u64 {
        self.rounds
            .iter()
            .take_while(|round| round.iter().all(|entry| !entry.is_live()))
            .count() as u64
    }

    fn earlier_rounds_complete(&self, round: u64) -> bool {
        self.window_closed() && self.rounds_complete() >= round
    }

    fn get(&self, round: u64, index: u64) -> Option<&DisputedEntry> {
        let (round, index) = slot(round, index)?;
        self.rounds.get(round)?.get(index)
    }

    fn set(&mut self, round: u64, index: u64, entry: DisputedEntry) {
        if let Some((round, index)) = slot(round, index) {
            if let Some(existing) = self.rounds.get_mut(round).and_then(|r| r.get_mut(index)) {
                *existing = entry;
            }
        }
    }

    /// Entry that is still competing
    fn live(&self, round: u64, index: u64) -> ArbiterResult<DisputedEntry> {
        if self.confirmed.is_some() {
            return revert("cycle-already-confirmed");
        }
        if !self.window_closed() {
            return revert("submission-window-still-open");
        }
        match self.get(round, index) {
            None => revert("entry-does-not-exist"),
            Some(entry) if !entry.is_live() => revert("entry-not-live"),
            Some(entry) => Ok(entry.clone()),
        }
    }

    /// Entry and its opponent, both still competing
    fn live_pair(&self, round: u64, index: u64) -> ArbiterResult<(DisputedEntry, DisputedEntry)> {
        let entry = self.live(round, index)?;
        match self.get(round, index ^ 1) {
            Some(opponent) if opponent.is_live() => Ok((entry, opponent.clone())),
            _ => revert("challenge-not-active"),
        }
    }

    fn eliminate(&mut self, round: u64, index: u64, reason: &str) {
        if let Some(mut entry) = self.get(round, index).cloned() {
            log::info!(
                "Round {} entry {} ({}) eliminated: {}",
                round,
                index,
                hex::encode(entry.submission.root_hash),
                reason
            );
            entry.status = EntryStatus::Eliminated;
            self.set(round, index, entry);
        }
    }

    fn advance(&mut self, round: u64, index: u64) {
        if let Some(mut entry) = self.get(round, index).cloned() {
            let next = entry.advance(self.clock);
            entry.status = EntryStatus::Advanced;
            self.set(round, index, entry);

            let next_round = (round + 1) as usize;
            if self.rounds.len() <= next_round {
                self.rounds.resize_with(next_round + 1, Vec::new);
            }
            self.rounds[next_round].push(next);
            log::info!(
                "Round {} entry {} advanced to round {} entry {}",
                round,
                index,
                round + 1,
                self.rounds[next_round].len() - 1
            );
        }
    }

    /// `index` loses, its opponent, if still competing, goes to the next round
    fn resolve(&mut self, round: u64, index: u64, reason: &str) {
        self.eliminate(round, index, reason);
        if self.get(round, index ^ 1).map_or(false, |opponent| opponent.is_live()) {
            self.advance(round, index ^ 1);
        }
    }

    fn check_challenge(
        &self,
        decay: &DecayRate,
        entry: &DisputedEntry,
        response: &ChallengeResponse,
    ) -> ArbiterResult<ChallengeOutcome> {
        let agreed = match entry.agreed_leaf {
            Some(agreed) => agreed,
            None => return revert("binary-search-result-not-confirmed"),
        };
        let step = entry.lower_bound;
        let jrh = &entry.submission.jrh;
        let jrh_n_nodes = entry.submission.jrh_n_nodes;

        if response.agree_state.index != step {
            return revert("invalid-challenge-step");
        }
        if !response.agree_state.verify(jrh, jrh_n_nodes) || response.agree_state.leaf != agreed {
            return revert("invalid-before-state-proof");
        }
        if !response.disagree_state.verify(jrh, jrh_n_nodes) {
            return revert("invalid-after-state-proof");
        }
        let update = match self.plan.step(step) {
            Some(update) => update,
            None => return revert("invalid-challenge-step"),
        };

        let before = &response.agree_reputation;
        match update {
            UpdateStep::Decay { uid, .. } if before.uid != uid => {
                return revert("decay-uid-incorrect");
            }
            UpdateStep::Update { key, .. } if response.key != key => {
                return revert("reputation-key-incorrect");
            }
            _ => {}
        }

        let agree_root = response.agree_state.leaf.state_root;
        let disagree_root = response.disagree_state.leaf.state_root;
        if !before.verify(&agree_root) {
            return revert("invalid-before-reputation-proof");
        }
        let after = ReputationProof {
            key: response.key,
            value: response.disagree_value,
            uid: response.disagree_uid,
            proof: before.proof.clone(),
        };
        if !after.verify(&disagree_root) {
            return revert("invalid-after-reputation-proof");
        }

        let (origin, child) = match update {
            UpdateStep::Update {
                kind: UpdateKind::Child { origin, child },
                ..
            } => {
                let origin_proof = match &response.origin_reputation {
                    Some(proof) if proof.key == origin => proof,
                    _ => return revert("origin-reputation-key-incorrect"),
                };
                if !origin_proof.verify(&agree_root) {
                    return revert("invalid-origin-reputation-proof");
                }
                let child_proof = match &response.child_reputation {
                    Some(proof) if proof.key == child => proof,
                    _ => return revert("child-reputation-key-incorrect"),
                };
                if !child_proof.verify(&agree_root) {
                    return revert("invalid-child-reputation-proof");
                }
                (origin_proof.value, child_proof.value)
            }
            _ => (0, 0),
        };

        let n_before = response.agree_state.leaf.n_nodes;
        let n_after = response.disagree_state.leaf.n_nodes;
        if before.is_present() {
            if response.disagree_uid != before.uid {
                return Ok(eliminated("reputation-uid-changed"));
            }
            if n_after != n_before {
                return Ok(eliminated("n-nodes-changed"));
            }
        } else {
            if n_before > 0 {
                match &response.newest_reputation {
                    Some(newest) if newest.uid == n_before && newest.verify(&agree_root) => {}
                    _ => return revert("invalid-newest-reputation-proof"),
                }
            }
            if response.disagree_uid != n_before + 1 {
                return Ok(eliminated("new-reputation-uid-incorrect"));
            }
            if n_after != n_before + 1 {
                return Ok(eliminated("n-nodes-incorrect"));
            }
        }

        let expected = update.apply(decay, before.value, origin, child);
        if response.disagree_value != expected.value {
            return Ok(eliminated("reputation-value-incorrect"));
        }

        Ok(ChallengeOutcome::Accepted {
            clamp: expected.clamp,
        })
    }
}

fn eliminated(reason: &str) -> ChallengeOutcome {
    ChallengeOutcome::Eliminated {
        reason: reason.to_string(),
    }
}

/// Arbiter of a single cycle, held in memory
#[derive(Debug)]
pub struct LocalArbiter {
    decay: DecayRate,
    response_window: u64,
    cycle: Mutex<Cycle>,
}

impl LocalArbiter {
    /// Start a cycle over the accepted state `accepted` and the update log `entries`, with the
    /// clock at 0
    pub fn new(
        accepted: JustificationLeaf,
        entries: &[LogEntry],
        skills: &SkillTree,
        decay: DecayRate,
        windows: Windows,
    ) -> Result<Self, ReputationError> {
        let plan = CyclePlan::new(accepted.n_nodes, entries, skills)?;
        log::info!(
            "Mining cycle started over state {} with {} log entries ({} steps)",
            hex::encode(accepted.state_root),
            entries.len(),
            plan.total_steps()
        );

        Ok(LocalArbiter {
            decay,
            response_window: windows.response,
            cycle: Mutex::new(Cycle {
                clock: 0,
                window_closes: windows.submission,
                accepted,
                plan,
                rounds: vec![],
                confirmed: None,
            }),
        })
    }

    fn cycle(&self) -> ArbiterResult<MutexGuard<'_, Cycle>> {
        self.cycle
            .lock()
            .map_err(|_| ArbiterError::Transport("arbiter state poisoned".to_string()))
    }

    /// Current time of the arbiter clock
    pub fn now(&self) -> ArbiterResult<u64> {
        Ok(self.cycle()?.clock)
    }

    /// Move the clock forward
    pub fn advance_time(&self, seconds: u64) -> ArbiterResult<u64> {
        let mut cycle = self.cycle()?;
        cycle.clock = cycle.clock.saturating_add(seconds);
        log::debug!("Arbiter clock at {}", cycle.clock);

        Ok(cycle.clock)
    }

    /// Number of steps a justification tree must cover
    pub fn total_steps(&self) -> ArbiterResult<u64> {
        Ok(self.cycle()?.plan.total_steps())
    }
}

impl Arbiter for LocalArbiter {
    fn status(&self) -> ArbiterResult<CycleStatus> {
        let cycle = self.cycle()?;

        Ok(CycleStatus {
            now: cycle.clock,
            submission_window_closed: cycle.window_closed(),
            response_window: self.response_window,
            round_lengths: cycle.rounds.iter().map(|round| round.len() as u64).collect(),
            rounds_complete: cycle.rounds_complete(),
            accepted: cycle.accepted,
            confirmed: cycle.confirmed,
        })
    }

    fn entry(&self, round: u64, index: u64) -> ArbiterResult<Option<DisputedEntry>> {
        Ok(self.cycle()?.get(round, index).cloned())
    }

    fn find_submission(&self, submitter: &H160) -> ArbiterResult<Option<Position>> {
        let cycle = self.cycle()?;
        for (round, entries) in cycle.rounds.iter().enumerate().rev() {
            if let Some((index, entry)) = entries
                .iter()
                .enumerate()
                .find(|(_, entry)| entry.submitters.contains(submitter))
            {
                return Ok(Some(Position {
                    round: round as u64,
                    index: index as u64,
                    entry: entry.clone(),
                }));
            }
        }

        Ok(None)
    }

    fn submit_root_hash(&self, submitter: H160, submission: Submission) -> ArbiterResult<()> {
        let mut cycle = self.cycle()?;
        if cycle.confirmed.is_some() {
            return revert("cycle-already-confirmed");
        }
        if cycle.window_closed() {
            return revert("submission-window-closed");
        }
        if submission.jrh_n_nodes == 0 {
            return revert("invalid-jrh-n-nodes");
        }
        if cycle.rounds.is_empty() {
            cycle.rounds.push(vec![]);
        }
        let clock = cycle.clock;
        let first_round = &mut cycle.rounds[0];
        if first_round
            .iter()
            .any(|entry| entry.submitters.contains(&submitter))
        {
            return revert("already-submitted");
        }

        match first_round
            .iter_mut()
            .find(|entry| entry.submission == submission)
        {
            Some(existing) => existing.submitters.push(submitter),
            None => first_round.push(DisputedEntry::new(submitter, submission, clock)),
        }
        log::info!(
            "{} submitted {} with {} reputations",
            hex::encode(submitter),
            hex::encode(submission.root_hash),
            submission.n_nodes
        );

        Ok(())
    }

    fn confirm_justification_root_hash(
        &self,
        round: u64,
        index: u64,
        first: &JustificationProof,
        last: &JustificationProof,
    ) -> ArbiterResult<()> {
        let mut cycle = self.cycle()?;
        let mut entry = cycle.live(round, index)?;
        if entry.jrh_confirmed {
            return revert("jrh-already-confirmed");
        }
        let submission = entry.submission;
        if submission.jrh_n_nodes != cycle.plan.total_steps() + 1 {
            return revert("invalid-jrh-n-nodes");
        }
        if first.index != 0 || !first.verify(&submission.jrh, submission.jrh_n_nodes) {
            return revert("invalid-jrh-proof-1");
        }
        if first.leaf != cycle.accepted {
            return revert("jrh-does-not-start-at-accepted-state");
        }
        if last.index != submission.jrh_n_nodes - 1
            || !last.verify(&submission.jrh, submission.jrh_n_nodes)
        {
            return revert("invalid-jrh-proof-2");
        }
        let claimed = JustificationLeaf {
            state_root: submission.root_hash,
            n_nodes: submission.n_nodes,
        };
        if last.leaf != claimed {
            return revert("jrh-does-not-end-at-submitted-state");
        }

        entry.jrh_confirmed = true;
        entry.challenge_steps_completed = 1;
        entry.lower_bound = 0;
        entry.upper_bound = submission.jrh_n_nodes - 1;
        entry.last_response = cycle.clock;
        cycle.set(round, index, entry);

        Ok(())
    }

    fn respond_to_binary_search(
        &self,
        round: u64,
        index: u64,
        proof: &JustificationProof,
    ) -> ArbiterResult<()> {
        let mut cycle = self.cycle()?;
        let (mut entry, mut opponent) = cycle.live_pair(round, index)?;
        if !entry.jrh_confirmed || !opponent.jrh_confirmed {
            return revert("challenge-not-active");
        }
        if entry.bisection_complete() {
            return revert("binary-search-complete");
        }
        if entry.challenge_steps_completed > opponent.challenge_steps_completed {
            return revert("waiting-for-opponent");
        }
        let target = entry.target();
        if proof.index != target
            || !proof.verify(&entry.submission.jrh, entry.submission.jrh_n_nodes)
        {
            return revert("invalid-binary-search-response");
        }

        entry.target_leaf = Some((target, proof.leaf));
        entry.challenge_steps_completed += 1;
        entry.last_response = cycle.clock;

        if entry.challenge_steps_completed == opponent.challenge_steps_completed {
            let agree = opponent.target_leaf.map(|(_, leaf)| leaf) == Some(proof.leaf);
            for side in [&mut entry, &mut opponent] {
                if agree {
                    side.lower_bound = target;
                } else {
                    side.upper_bound = target;
                }
                side.target_leaf = None;
            }
            log::debug!(
                "Round {} entries {} and {} {} at leaf {}",
                round,
                index & !1,
                index | 1,
                if agree { "agree" } else { "disagree" },
                target
            );
            cycle.set(round, index ^ 1, opponent);
        }
        cycle.set(round, index, entry);

        Ok(())
    }

    fn confirm_binary_search_result(
        &self,
        round: u64,
        index: u64,
        proof: &JustificationProof,
    ) -> ArbiterResult<()> {
        let mut cycle = self.cycle()?;
        let (mut entry, opponent) = cycle.live_pair(round, index)?;
        if !entry.jrh_confirmed {
            return revert("jrh-hash-not-verified");
        }
        if !opponent.jrh_confirmed || !entry.bisection_complete() {
            return revert("binary-search-incomplete");
        }
        if entry.agreed_leaf.is_some() {
            return revert("binary-search-result-already-confirmed");
        }
        if entry.challenge_steps_completed > opponent.challenge_steps_completed {
            return revert("waiting-for-opponent");
        }
        if proof.index != entry.lower_bound
            || !proof.verify(&entry.submission.jrh, entry.submission.jrh_n_nodes)
        {
            return revert("invalid-binary-search-result-proof");
        }
        if let Some(theirs) = opponent.agreed_leaf {
            if theirs != proof.leaf {
                return revert("binary-search-result-mismatch");
            }
        }

        entry.agreed_leaf = Some(proof.leaf);
        entry.challenge_steps_completed += 1;
        entry.last_response = cycle.clock;
        cycle.set(round, index, entry);

        Ok(())
    }

    fn respond_to_challenge(&self, wire: &ChallengeWire) -> ArbiterResult<ChallengeOutcome> {
        let response = wire
            .decode()
            .map_err(|e| ArbiterError::Reverted(e.to_string()))?;
        let (round, index) = (response.round, response.index);

        let mut cycle = self.cycle()?;
        let (mut entry, _) = cycle.live_pair(round, index)?;
        if !entry.jrh_confirmed {
            return revert("binary-search-result-not-confirmed");
        }
        if !entry.bisection_complete() {
            return revert("binary-search-incomplete");
        }
        if entry.agreed_leaf.is_none() {
            return revert("binary-search-result-not-confirmed");
        }
        if entry.challenge_responded {
            return revert("challenge-already-responded");
        }

        let outcome = cycle.check_challenge(&self.decay, &entry, &response)?;
        match &outcome {
            ChallengeOutcome::Accepted { clamp } => {
                log::info!(
                    "Round {} entry {} proved step {} ({:?})",
                    round,
                    index,
                    entry.lower_bound,
                    clamp
                );
                entry.challenge_responded = true;
                entry.challenge_steps_completed += 1;
                entry.last_response = cycle.clock;
                cycle.set(round, index, entry);
            }
            ChallengeOutcome::Eliminated { reason } => cycle.resolve(round, index, reason),
        }

        Ok(outcome)
    }

    fn invalidate_hash(&self, round: u64, index: u64) -> ArbiterResult<()> {
        let mut cycle = self.cycle()?;
        let entry = cycle.live(round, index)?;

        let opponent = match cycle.get(round, index ^ 1) {
            Some(opponent) => opponent.clone(),
            None => {
                let round_len = slot(round, 0)
                    .and_then(|(round, _)| cycle.rounds.get(round))
                    .map_or(0, Vec::len);
                if round_len <= 1 {
                    return revert("cannot-invalidate-final-hash");
                }
                if !cycle.earlier_rounds_complete(round) {
                    return revert("earlier-rounds-incomplete");
                }
                log::info!("Round {} entry {} has no opponent", round, index);
                cycle.advance(round, index);
                return Ok(());
            }
        };
        if !opponent.is_live() {
            return revert("challenge-not-active");
        }

        if entry.challenge_responded && opponent.challenge_responded {
            cycle.resolve(round, index.max(index ^ 1), "both challenge responses accepted");
            return Ok(());
        }

        let last_response = entry.last_response.max(opponent.last_response);
        if cycle.clock < last_response.saturating_add(self.response_window) {
            return revert("response-window-still-open");
        }
        match entry
            .challenge_steps_completed
            .cmp(&opponent.challenge_steps_completed)
        {
            Ordering::Less => cycle.resolve(round, index, "timed out"),
            Ordering::Equal => {
                cycle.eliminate(round, index, "timed out");
                cycle.eliminate(round, index ^ 1, "timed out");
            }
            Ordering::Greater => return revert("cannot-invalidate-leading-entry"),
        }

        Ok(())
    }

    fn confirm_new_hash(&self, round: u64) -> ArbiterResult<H256> {
        let mut cycle = self.cycle()?;
        if cycle.confirmed.is_some() {
            return revert("cycle-already-confirmed");
        }
        if !cycle.window_closed() {
            return revert("submission-window-still-open");
        }
        if round + 1 != cycle.rounds.len() as u64 {
            return revert("not-final-round");
        }
        if !cycle.earlier_rounds_complete(round) {
            return revert("earlier-rounds-incomplete");
        }
        let winner = match cycle.rounds.last().map(Vec::as_slice) {
            Some([entry]) if entry.is_live() => entry.submission,
            _ => return revert("not-final-round"),
        };

        cycle.confirmed = Some(winner.root_hash);
        cycle.accepted = JustificationLeaf {
            state_root: winner.root_hash,
            n_nodes: winner.n_nodes,
        };
        log::info!(
            "Confirmed {} with {} reputations",
            hex::encode(winner.root_hash),
            winner.n_nodes
        );

        Ok(winner.root_hash)
    }
}
