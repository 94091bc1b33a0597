//! Simulation of a whole cycle: several engines disputing against one `LocalArbiter`.

use std::sync::Arc;

use ethereum_types::{H160, H256};

use repminer_storage::storage::Storage;

use crate::{
    arbiter::Arbiter,
    engine::{DisputeEngine, Phase, Step},
    error::{DisputeError, Result},
    local::LocalArbiter,
    retry::RetryPolicy,
};

/// How a simulated cycle ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TournamentResult {
    /// Root accepted by the arbiter, if any submission survived
    pub confirmed: Option<H256>,
    /// Final phase of every engine, in the order they were added
    pub phases: Vec<(H160, Phase)>,
}

/// Runs engines in turns, moving the arbiter clock whenever all of them are waiting
pub struct Tournament<S> {
    arbiter: Arc<LocalArbiter>,
    engines: Vec<DisputeEngine<LocalArbiter, S>>,
}

impl<S: Storage> Tournament<S> {
    pub fn new(arbiter: Arc<LocalArbiter>) -> Self {
        Tournament {
            arbiter,
            engines: vec![],
        }
    }

    pub fn add(&mut self, engine: DisputeEngine<LocalArbiter, S>) {
        self.engines.push(engine);
    }

    pub fn engines(&self) -> &[DisputeEngine<LocalArbiter, S>] {
        &self.engines
    }

    /// Run until the arbiter confirms a root, or every engine is out of the dispute
    pub fn run(&mut self, max_iterations: usize) -> Result<TournamentResult> {
        let once = RetryPolicy::new(1, 0);

        for iteration in 0..max_iterations {
            let status = once.run("status", || self.arbiter.status())?;
            let finished = self
                .engines
                .iter()
                .all(|engine| engine.phase().is_final());
            if status.confirmed.is_some() || finished {
                for engine in self.engines.iter_mut() {
                    if !engine.phase().is_final() && engine.phase() != Phase::Idle {
                        engine.resync()?;
                    }
                }
                log::info!("Tournament over after {} iterations", iteration);

                return Ok(TournamentResult {
                    confirmed: status.confirmed,
                    phases: self
                        .engines
                        .iter()
                        .map(|engine| (engine.submitter(), engine.phase()))
                        .collect(),
                });
            }

            let mut acted = false;
            for engine in self.engines.iter_mut() {
                if engine.phase().is_final() {
                    continue;
                }
                match engine.step() {
                    Ok(Step::Acted(_)) => acted = true,
                    Ok(Step::Waiting) | Ok(Step::Done(_)) | Ok(Step::Halted { .. }) => {}
                    // The engine resyncs on its next step
                    Err(DisputeError::Reverted { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
            if !acted {
                let seconds = status.response_window.max(1);
                once.run("advance time", || self.arbiter.advance_time(seconds))?;
            }
        }

        Err(DisputeError::Stalled(max_iterations))
    }
}
