use std::{env, path::PathBuf};

use structopt::StructOpt;

use repminer_config as config;

mod input;
mod simulate;
mod state;

pub fn from_args() -> Cli {
    Cli::from_args()
}

pub fn exec(command: Cli) -> anyhow::Result<()> {
    let Cli {
        config,
        debug,
        trace,
        no_timestamp,
        no_module_path,
        cmd,
    } = command;

    let mut log_opts = LogOptions::default();
    let config = get_config(config.or_else(config::dirs::find_config))?;

    log_opts.level = config.log.level;
    log_opts.source = LogOptionsSource::Config;
    log_opts.timestamp = !no_timestamp;
    log_opts.module_path = !no_module_path;

    if let Ok(rust_log) = env::var("RUST_LOG") {
        if rust_log.contains("repminer") {
            log_opts.level = env_logger::Logger::from_default_env().filter();
            log_opts.source = LogOptionsSource::Env;
        }
    }

    if trace {
        log_opts.level = log::LevelFilter::Trace;
        log_opts.source = LogOptionsSource::Flag;
    } else if debug {
        log_opts.level = log::LevelFilter::Debug;
        log_opts.source = LogOptionsSource::Flag;
    }

    init_logger(log_opts);

    exec_cmd(cmd, config)
}

fn exec_cmd(command: Command, config: config::Config) -> anyhow::Result<()> {
    match command {
        Command::Replay(cmd) => state::replay(cmd, &config),
        Command::Proof(cmd) => state::proof(cmd, &config),
        Command::Show(cmd) => state::show(cmd, &config),
        Command::Reset => state::reset(&config),
        Command::Simulate(cmd) => simulate::exec(cmd, &config),
    }
}

fn init_logger(opts: LogOptions) {
    println!(
        "Setting log level to: {}, source: {:?}",
        opts.level, opts.source
    );
    let timestamp = if opts.timestamp {
        Some(env_logger::fmt::TimestampPrecision::Seconds)
    } else {
        None
    };
    env_logger::Builder::from_env(env_logger::Env::default())
        .format_timestamp(timestamp)
        .format_module_path(opts.module_path)
        .filter_level(log::LevelFilter::Info)
        .filter_module("repminer", opts.level)
        .init();
}

fn get_config(path: Option<PathBuf>) -> anyhow::Result<config::Config> {
    match path {
        Some(p) => {
            println!("Loading config from: {}", p.display());
            Ok(config::loaders::toml::from_file(p)?)
        }
        None => {
            println!("HEADS UP! No configuration specified/found. Using default one!");
            Ok(config::Config::default())
        }
    }
}

#[derive(Debug, StructOpt)]
#[structopt(name = "repminer", about = "Reputation mining client.")]
pub struct Cli {
    /// Load configuration from this file. If not specified, `repminer.toml` is looked up in the
    /// current directory, in the platform configuration directory and in /etc/repminer, in
    /// that order. If none is found the default configuration is used.
    #[structopt(short = "c", long = "config")]
    config: Option<PathBuf>,
    /// Turn on DEBUG logging.
    #[structopt(long = "debug")]
    debug: bool,
    /// Turn on TRACE logging.
    #[structopt(long = "trace")]
    trace: bool,
    /// Do not show timestamps in logs.
    #[structopt(long = "no-timestamp")]
    no_timestamp: bool,
    /// Do not show module path in logs.
    #[structopt(long = "no-module-path")]
    no_module_path: bool,
    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    #[structopt(
        name = "replay",
        about = "Replay an update log and store the resulting state."
    )]
    Replay(state::ReplayParams),
    #[structopt(
        name = "proof",
        about = "Prove a reputation against a stored state."
    )]
    Proof(state::ProofParams),
    #[structopt(
        name = "show",
        about = "List stored states, or the reputations of one of them."
    )]
    Show(state::ShowParams),
    #[structopt(
        name = "reset",
        about = "Delete every stored state and dispute."
    )]
    Reset,
    #[structopt(
        name = "simulate",
        about = "Run a dispute between an honest miner and faulty ones against a local arbiter."
    )]
    Simulate(simulate::SimulateParams),
}

struct LogOptions {
    level: log::LevelFilter,
    timestamp: bool,
    module_path: bool,
    source: LogOptionsSource,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: log::LevelFilter::Error,
            timestamp: true,
            module_path: true,
            source: LogOptionsSource::Defaults,
        }
    }
}

#[derive(Debug)]
enum LogOptionsSource {
    Defaults,
    Config,
    Env,
    Flag,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_config_holds_the_defaults() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(config::defaults::CONFIG_FILE);

        assert_eq!(get_config(Some(path)).unwrap(), config::Config::default());
    }

    #[test]
    fn parse_command_line() {
        let cli = Cli::from_iter_safe(&[
            "repminer",
            "--debug",
            "simulate",
            "--log",
            "log.json",
            "--skills",
            "skills.json",
            "--fault",
            "extra:7:1",
            "--fault",
            "uid:3:9",
        ])
        .unwrap();
        assert!(cli.debug);
        match cli.cmd {
            Command::Simulate(params) => {
                assert_eq!(params.faults.len(), 2);
                assert_eq!(params.max_iterations, 10_000);
                assert_eq!(params.from, None);
            }
            other => panic!("unexpected command {:?}", other),
        }

        assert!(Cli::from_iter_safe(&["repminer", "proof", "--root", "0x12"]).is_err());
    }
}
