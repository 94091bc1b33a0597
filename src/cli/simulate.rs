//! `simulate`: dispute a cycle between one honest miner and faulty ones.

use std::{path::PathBuf, sync::Arc};

use ethereum_types::{H160, H256};
use prettytable::{cell, row, Table};
use structopt::StructOpt;

use repminer_config::config::Config;
use repminer_data_structures::{log_entry::LogEntry, proof::JustificationLeaf};
use repminer_dispute::{
    local::{LocalArbiter, Windows},
    retry::RetryPolicy,
    tournament::{Tournament, TournamentResult},
    DisputeEngine,
};
use repminer_reputation::{
    fault::{FaultInjector, Honest},
    ReputationStateStore, UpdateLogReplayer,
};
use repminer_storage::backends::hashmap;

use super::{input, state};

#[derive(Debug, StructOpt)]
pub struct SimulateParams {
    /// Update log: a JSON list of entries, or with `--encoded` the hex of its wire encoding.
    #[structopt(long = "log", parse(from_os_str))]
    pub log: PathBuf,
    /// Read the update log as hex instead of JSON.
    #[structopt(long = "encoded")]
    pub encoded: bool,
    /// Skill hierarchy: a JSON list of `{"id": .., "parent": ..}`, parents first.
    #[structopt(long = "skills", parse(from_os_str))]
    pub skills: PathBuf,
    /// Root of the stored state the cycle starts from. Starts from the empty state if omitted.
    #[structopt(long = "from", parse(try_from_str = input::parse_h256))]
    pub from: Option<H256>,
    /// Add a faulty miner: `extra:<step>:<amount>` or `uid:<step>:<uid>`. Can be repeated.
    #[structopt(long = "fault", parse(try_from_str = input::parse_fault))]
    pub faults: Vec<Box<dyn FaultInjector>>,
    /// Stop if no root is confirmed after this many turns.
    #[structopt(long = "max-iterations", default_value = "10000")]
    pub max_iterations: usize,
}

/// Address of the simulated miner number `n`
fn miner(n: usize) -> H160 {
    H160::from_low_u64_be(n as u64 + 1)
}

pub fn exec(params: SimulateParams, config: &Config) -> anyhow::Result<()> {
    let storage = state::open_storage(config)?;
    let replayer = state::replayer(config, &params.skills)?;
    let entries = input::read_log(&params.log, params.encoded)?;
    let start = state::starting_state(&*storage, params.from)?;

    let mut miners: Vec<&dyn FaultInjector> = vec![&Honest];
    miners.extend(params.faults.iter().map(|fault| &**fault));
    let result = run(
        config,
        &replayer,
        &start,
        &entries,
        &miners,
        params.max_iterations,
    )?;

    let mut table = Table::new();
    table.set_format(*prettytable::format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    table.set_titles(row!["Miner", "Behaviour", "Result"]);
    for ((submitter, phase), behaviour) in result.phases.iter().zip(&miners) {
        table.add_row(row![
            hex::encode(submitter),
            format!("{:?}", behaviour),
            format!("{:?}", phase)
        ]);
    }
    table.printstd();

    match result.confirmed {
        Some(root) => {
            let honest = replayer.replay(&start, &entries, &Honest)?;
            if honest.root_hash() == root {
                honest.state.save(&*storage)?;
            }
            println!("Confirmed root {}", hex::encode(root));
        }
        None => println!("No root was confirmed"),
    }

    Ok(())
}

/// Replay the log once per miner and dispute the results until a root is confirmed
pub fn run(
    config: &Config,
    replayer: &UpdateLogReplayer,
    start: &ReputationStateStore,
    entries: &[LogEntry],
    miners: &[&dyn FaultInjector],
    max_iterations: usize,
) -> anyhow::Result<TournamentResult> {
    let accepted = JustificationLeaf {
        state_root: start.root_hash(),
        n_nodes: start.n_nodes(),
    };
    let windows = Windows {
        submission: config.dispute.submission_window_secs,
        response: config.dispute.response_window_secs,
    };
    let arbiter = Arc::new(LocalArbiter::new(
        accepted,
        entries,
        replayer.skills(),
        *replayer.decay(),
        windows,
    )?);
    let retry = RetryPolicy::new(
        config.dispute.retry_attempts,
        config.dispute.retry_backoff_ms,
    );

    let mut tournament = Tournament::new(arbiter.clone());
    for (n, fault) in miners.iter().enumerate() {
        let replay = replayer.replay(start, entries, *fault)?;
        log::info!(
            "Miner {} ({:?}) computed {}",
            n,
            fault,
            hex::encode(replay.root_hash())
        );
        // Every miner keeps its own dispute records
        let mut engine = DisputeEngine::new(
            arbiter.clone(),
            Arc::new(hashmap::Backend::default()),
            miner(n),
            retry,
        );
        engine.prepare(&replay)?;
        tournament.add(engine);
    }

    Ok(tournament.run(max_iterations)?)
}
