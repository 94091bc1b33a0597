//! Dispute engine
//!
//! Client side state machine of one submission. Every transition is checked locally before the
//! corresponding arbiter call is made, and the progress is persisted after every accepted call
//! so that a dispute can be resumed after a restart.
//!
//! ```text
//! Idle -> RootSubmitted -> JustificationConfirmed -> Bisecting -> BisectionConfirmed
//!      -> ChallengeResponded -> Survived (next round) | Eliminated
//!      ... -> Confirmed
//! ```

use std::sync::Arc;

use ethereum_types::H160;
use serde::{Deserialize, Serialize};

use repminer_data_structures::{
    dispute::{DisputedEntry, EntryStatus, Submission},
    proof::JustificationProof,
};
use repminer_reputation::{error::ReputationError, replay::Replay, JustificationTree};
use repminer_storage::storage::Storage;

use crate::{
    arbiter::{Arbiter, ChallengeOutcome, CycleStatus, Position},
    error::{ArbiterResult, DisputeError, Result},
    progress::DisputeProgress,
    retry::RetryPolicy,
};

/// Phase of a submission in the dispute
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Nothing submitted yet
    Idle,
    RootSubmitted,
    JustificationConfirmed,
    Bisecting,
    BisectionConfirmed,
    ChallengeResponded,
    /// Won a round and waits to start the next one
    Survived,
    Eliminated,
    /// The submission is the accepted result of the cycle
    Confirmed,
}

impl Phase {
    /// Whether the dispute is over for this submission
    pub fn is_final(&self) -> bool {
        matches!(self, Phase::Eliminated | Phase::Confirmed)
    }

    /// Phase matching an entry as read from the arbiter
    fn of_entry(round: u64, entry: &DisputedEntry) -> Phase {
        if entry.status == EntryStatus::Eliminated {
            Phase::Eliminated
        } else if !entry.jrh_confirmed {
            if round > 0 {
                Phase::Survived
            } else {
                Phase::RootSubmitted
            }
        } else if entry.challenge_responded {
            Phase::ChallengeResponded
        } else if entry.agreed_leaf.is_some() {
            Phase::BisectionConfirmed
        } else if entry.challenge_steps_completed > 1 {
            Phase::Bisecting
        } else {
            Phase::JustificationConfirmed
        }
    }
}

/// What a call to `DisputeEngine::step` did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Made an arbiter call, leaving the engine in this phase
    Acted(Phase),
    /// Nothing to do until the opponent acts or time passes
    Waiting,
    /// The dispute is over
    Done(Phase),
    /// `action` was rejected and nothing changed since. It is not attempted again until the
    /// arbiter state of this submission moves.
    Halted { action: &'static str },
}

/// Call rejected by the arbiter, with the progress it was attempted from
struct Rejected {
    action: &'static str,
    progress: DisputeProgress,
}

/// Drives the dispute of one submitter against an arbiter
pub struct DisputeEngine<A, S> {
    arbiter: Arc<A>,
    storage: Arc<S>,
    retry: RetryPolicy,
    progress: DisputeProgress,
    justification: Option<JustificationTree>,
    needs_resync: bool,
    rejected: Option<Rejected>,
}

impl<A, S> DisputeEngine<A, S>
where
    A: Arbiter,
    S: Storage,
{
    pub fn new(arbiter: Arc<A>, storage: Arc<S>, submitter: H160, retry: RetryPolicy) -> Self {
        DisputeEngine {
            arbiter,
            storage,
            retry,
            progress: DisputeProgress::new(submitter),
            justification: None,
            needs_resync: false,
            rejected: None,
        }
    }

    /// Rebuild an engine from the progress persisted in `storage`.
    ///
    /// Fails with `JustificationTreeLost` if the dispute is still live but its justification
    /// tree is gone, since no further challenge could be answered.
    pub fn resume(
        arbiter: Arc<A>,
        storage: Arc<S>,
        submitter: H160,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let progress = DisputeProgress::load(&*storage, &submitter)?
            .ok_or(DisputeError::NoProgress(submitter))?;

        let justification = match progress.submission {
            Some(submission) if !progress.phase.is_final() => {
                match JustificationTree::load(&*storage, &submission.jrh) {
                    Ok(tree) => Some(tree),
                    Err(ReputationError::JustificationNotFound(jrh)) => {
                        log::error!(
                            "Justification tree {} of {} is lost",
                            hex::encode(jrh),
                            hex::encode(submitter)
                        );
                        return Err(DisputeError::JustificationTreeLost(jrh));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            _ => None,
        };
        log::info!(
            "Resuming dispute of {} in {:?}",
            hex::encode(submitter),
            progress.phase
        );

        let mut engine = DisputeEngine {
            arbiter,
            storage,
            retry,
            progress,
            justification,
            needs_resync: false,
            rejected: None,
        };
        if !engine.progress.phase.is_final() {
            engine.resync()?;
        }

        Ok(engine)
    }

    pub fn submitter(&self) -> H160 {
        self.progress.submitter
    }

    pub fn phase(&self) -> Phase {
        self.progress.phase
    }

    pub fn progress(&self) -> &DisputeProgress {
        &self.progress
    }

    /// Whether an arbiter call was rejected since the last resync
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    /// Take the result of a completed replay as what this engine submits
    pub fn prepare(&mut self, replay: &Replay) -> Result<()> {
        self.ensure("prepare a submission", &[Phase::Idle])?;
        let justification = replay.justification.clone();
        justification.save(&*self.storage)?;

        self.progress.submission = Some(Submission {
            root_hash: replay.root_hash(),
            n_nodes: replay.n_nodes(),
            jrh: replay.jrh(),
            jrh_n_nodes: replay.jrh_n_nodes(),
        });
        self.justification = Some(justification);
        self.save()
    }

    pub fn submit_root_hash(&mut self) -> Result<()> {
        self.ensure("submit a root hash", &[Phase::Idle])?;
        let submission = self.submission("submit a root hash")?;
        let submitter = self.progress.submitter;
        self.call("submitRootHash", |arbiter| {
            arbiter.submit_root_hash(submitter, submission)
        })?;
        log::info!(
            "{} submitted {}",
            hex::encode(submitter),
            hex::encode(submission.root_hash)
        );

        let position = self.position()?;
        self.update(&position, Phase::RootSubmitted)
    }

    pub fn confirm_justification_root_hash(&mut self) -> Result<()> {
        self.ensure(
            "confirm the justification root hash",
            &[Phase::RootSubmitted, Phase::Survived],
        )?;
        let tree = self.justification()?;
        let first = tree.get_proof(0);
        let last = tree.get_proof(tree.n_nodes().saturating_sub(1));
        let (first, last) = match (first, last) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(self.lost()),
        };

        let (round, index) = (self.progress.round, self.progress.index);
        self.call("confirmJustificationRootHash", |arbiter| {
            arbiter.confirm_justification_root_hash(round, index, &first, &last)
        })?;

        let position = self.position()?;
        self.update(&position, Phase::JustificationConfirmed)
    }

    pub fn respond_to_binary_search(&mut self) -> Result<()> {
        self.ensure(
            "respond to the binary search",
            &[Phase::JustificationConfirmed, Phase::Bisecting],
        )?;
        let position = self.position()?;
        if position.entry.bisection_complete() {
            return Err(self.out_of_order("respond to a complete binary search"));
        }
        let target = position.entry.target();
        let proof = self.leaf_proof(target)?;

        let (round, index) = (position.round, position.index);
        self.call("respondToBinarySearchForChallenge", |arbiter| {
            arbiter.respond_to_binary_search(round, index, &proof)
        })?;
        log::debug!("Revealed justification leaf {}", target);

        let position = self.position()?;
        self.update(&position, Phase::Bisecting)
    }

    pub fn confirm_binary_search_result(&mut self) -> Result<()> {
        self.ensure(
            "confirm the binary search result",
            &[Phase::JustificationConfirmed, Phase::Bisecting],
        )?;
        let position = self.position()?;
        if !position.entry.bisection_complete() {
            return Err(self.out_of_order("confirm an incomplete binary search"));
        }
        let proof = self.leaf_proof(position.entry.lower_bound)?;

        let (round, index) = (position.round, position.index);
        self.call("confirmBinarySearchResult", |arbiter| {
            arbiter.confirm_binary_search_result(round, index, &proof)
        })?;
        log::info!(
            "Disagreement narrowed down to step {}",
            position.entry.lower_bound
        );

        let position = self.position()?;
        self.update(&position, Phase::BisectionConfirmed)
    }

    pub fn respond_to_challenge(&mut self) -> Result<ChallengeOutcome> {
        self.ensure("respond to the challenge", &[Phase::BisectionConfirmed])?;
        let position = self.position()?;
        let response = self.justification()?.challenge_response(
            position.round,
            position.index,
            position.entry.lower_bound,
        )?;
        let wire = response.to_wire();

        let outcome = self.call("respondToChallenge", |arbiter| {
            arbiter.respond_to_challenge(&wire)
        })?;
        match &outcome {
            ChallengeOutcome::Accepted { clamp } => {
                log::info!(
                    "Challenge at step {} answered ({:?})",
                    position.entry.lower_bound,
                    clamp
                );
                let position = self.position()?;
                self.update(&position, Phase::ChallengeResponded)?;
            }
            ChallengeOutcome::Eliminated { reason } => {
                log::warn!(
                    "Submission {} eliminated at step {}: {}",
                    hex::encode(position.entry.submission.root_hash),
                    position.entry.lower_bound,
                    reason
                );
                self.update(&position, Phase::Eliminated)?;
            }
        }

        Ok(outcome)
    }

    /// Invalidate the opponent once it has fallen behind for longer than the response window
    pub fn invalidate_opponent(&mut self) -> Result<()> {
        let (round, index) = self.live_slot("invalidate the opponent")?;
        self.call("invalidateHash", |arbiter| {
            arbiter.invalidate_hash(round, index ^ 1)
        })?;
        self.resync().map(|_| ())
    }

    /// Move to the next round when there is no opponent in this one
    pub fn claim_bye(&mut self) -> Result<()> {
        let (round, index) = self.live_slot("claim a bye")?;
        self.call("invalidateHash", |arbiter| arbiter.invalidate_hash(round, index))?;
        self.resync().map(|_| ())
    }

    /// Settle a pair in which both challenge responses were accepted
    pub fn settle_responded_pair(&mut self) -> Result<()> {
        self.ensure("settle the pair", &[Phase::ChallengeResponded])?;
        let (round, index) = (self.progress.round, self.progress.index);
        self.call("invalidateHash", |arbiter| {
            arbiter.invalidate_hash(round, index.max(index ^ 1))
        })?;
        self.resync().map(|_| ())
    }

    /// Confirm this submission as the result of the cycle
    pub fn confirm_new_hash(&mut self) -> Result<()> {
        let (round, _) = self.live_slot("confirm the new hash")?;
        let root = self.call("confirmNewHash", |arbiter| arbiter.confirm_new_hash(round))?;
        log::info!("Cycle confirmed with {}", hex::encode(root));
        self.resync().map(|_| ())
    }

    /// Reconcile the local phase with the arbiter
    pub fn resync(&mut self) -> Result<Phase> {
        let submitter = self.progress.submitter;
        let status = self.call("status", |arbiter| arbiter.status())?;
        let position = self.call("findSubmission", |arbiter| {
            arbiter.find_submission(&submitter)
        })?;
        self.needs_resync = false;

        let phase = match &position {
            None => Phase::Idle,
            Some(position) if status.confirmed == Some(position.entry.submission.root_hash) => {
                Phase::Confirmed
            }
            Some(position) => Phase::of_entry(position.round, &position.entry),
        };
        if phase != self.progress.phase {
            log::info!(
                "{}: {:?} -> {:?}",
                hex::encode(submitter),
                self.progress.phase,
                phase
            );
        }
        match position {
            Some(position) => self.update(&position, phase)?,
            None => {
                self.progress.phase = phase;
                self.save()?;
            }
        }

        Ok(phase)
    }

    /// Make the next move allowed by the arbiter state
    pub fn step(&mut self) -> Result<Step> {
        let phase = if self.needs_resync || self.progress.phase != Phase::Idle {
            self.resync()?
        } else {
            Phase::Idle
        };
        if let Some(rejected) = &self.rejected {
            if rejected.progress == self.progress {
                log::debug!(
                    "{} not retrying {} in {:?}",
                    hex::encode(self.progress.submitter),
                    rejected.action,
                    phase
                );
                return Ok(Step::Halted {
                    action: rejected.action,
                });
            }
            self.rejected = None;
        }
        if phase == Phase::Idle {
            self.submit_root_hash()?;
            return Ok(Step::Acted(self.progress.phase));
        }
        if phase.is_final() {
            return Ok(Step::Done(phase));
        }

        let status = self.call("status", |arbiter| arbiter.status())?;
        let position = self.position()?;
        let round = position.round;
        let opponent_index = position.opponent_index();
        let opponent = self.call("entry", |arbiter| arbiter.entry(round, opponent_index))?;

        let opponent = match opponent {
            Some(opponent) if opponent.is_live() => opponent,
            Some(_) => return Ok(Step::Waiting),
            None => {
                if !status.earlier_rounds_complete(round) {
                    return Ok(Step::Waiting);
                }
                if status.round_len(round) == 1 && status.is_last_round(round) {
                    self.confirm_new_hash()?;
                } else {
                    self.claim_bye()?;
                }
                return Ok(Step::Acted(self.progress.phase));
            }
        };
        if !status.submission_window_closed {
            return Ok(Step::Waiting);
        }

        let entry = &position.entry;
        match phase {
            Phase::RootSubmitted | Phase::Survived => self.confirm_justification_root_hash()?,
            Phase::JustificationConfirmed | Phase::Bisecting => {
                if !opponent.jrh_confirmed
                    || entry.challenge_steps_completed > opponent.challenge_steps_completed
                {
                    return self.wait_or_invalidate(&status, entry, &opponent);
                }
                if entry.bisection_complete() {
                    self.confirm_binary_search_result()?;
                } else {
                    self.respond_to_binary_search()?;
                }
            }
            Phase::BisectionConfirmed => {
                self.respond_to_challenge()?;
            }
            Phase::ChallengeResponded => {
                if !opponent.challenge_responded {
                    return self.wait_or_invalidate(&status, entry, &opponent);
                }
                self.settle_responded_pair()?;
            }
            Phase::Idle | Phase::Eliminated | Phase::Confirmed => return Ok(Step::Done(phase)),
        }

        Ok(Step::Acted(self.progress.phase))
    }

    fn wait_or_invalidate(
        &mut self,
        status: &CycleStatus,
        entry: &DisputedEntry,
        opponent: &DisputedEntry,
    ) -> Result<Step> {
        let deadline = entry
            .last_response
            .max(opponent.last_response)
            .saturating_add(status.response_window);
        if opponent.challenge_steps_completed < entry.challenge_steps_completed
            && status.now >= deadline
        {
            log::info!("Opponent of {} stalled", hex::encode(self.progress.submitter));
            self.invalidate_opponent()?;
            return Ok(Step::Acted(self.progress.phase));
        }

        Ok(Step::Waiting)
    }

    fn call<T, F>(&mut self, action: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut(&A) -> ArbiterResult<T>,
    {
        let arbiter: &A = &self.arbiter;
        let result = self.retry.run(action, || call(arbiter));
        if let Err(DisputeError::Reverted { .. }) = &result {
            self.needs_resync = true;
            self.rejected = Some(Rejected {
                action,
                progress: self.progress.clone(),
            });
        }

        result
    }

    fn ensure(&self, action: &'static str, allowed: &[Phase]) -> Result<()> {
        if self.needs_resync {
            return Err(DisputeError::NeedsResync);
        }
        if !allowed.contains(&self.progress.phase) {
            return Err(self.out_of_order(action));
        }

        Ok(())
    }

    fn live_slot(&self, action: &'static str) -> Result<(u64, u64)> {
        if self.needs_resync {
            return Err(DisputeError::NeedsResync);
        }
        if self.progress.phase == Phase::Idle || self.progress.phase.is_final() {
            return Err(self.out_of_order(action));
        }

        Ok((self.progress.round, self.progress.index))
    }

    fn out_of_order(&self, action: &'static str) -> DisputeError {
        DisputeError::ProtocolOrder {
            phase: self.progress.phase,
            action,
        }
    }

    fn submission(&self, action: &'static str) -> Result<Submission> {
        self.progress
            .submission
            .ok_or_else(|| self.out_of_order(action))
    }

    fn lost(&self) -> DisputeError {
        DisputeError::JustificationTreeLost(
            self.progress
                .submission
                .map(|submission| submission.jrh)
                .unwrap_or_default(),
        )
    }

    fn justification(&self) -> Result<&JustificationTree> {
        self.justification.as_ref().ok_or_else(|| self.lost())
    }

    fn leaf_proof(&self, index: u64) -> Result<JustificationProof> {
        let tree = self.justification()?;
        tree.get_proof(index).ok_or_else(|| {
            DisputeError::Reputation(ReputationError::StepOutOfRange {
                step: index,
                n_leaves: tree.n_nodes(),
            })
        })
    }

    fn position(&mut self) -> Result<Position> {
        let submitter = self.progress.submitter;
        self.call("findSubmission", |arbiter| arbiter.find_submission(&submitter))?
            .ok_or(DisputeError::SubmissionNotFound(submitter))
    }

    fn update(&mut self, position: &Position, phase: Phase) -> Result<()> {
        self.progress.round = position.round;
        self.progress.index = position.index;
        self.progress.lower_bound = position.entry.lower_bound;
        self.progress.upper_bound = position.entry.upper_bound;
        self.progress.phase = phase;
        if phase.is_final() {
            self.finish()?;
        }

        self.save()
    }

    /// Drop the justification tree once the dispute is over
    fn finish(&mut self) -> Result<()> {
        if let (Some(submission), Some(_)) = (self.progress.submission, self.justification.take()) {
            JustificationTree::delete(&*self.storage, &submission.jrh)?;
        }

        Ok(())
    }

    fn save(&self) -> Result<()> {
        self.progress.save(&*self.storage)
    }
}
