//! Commands over the locally stored reputation states.

use std::path::{Path, PathBuf};

use ethereum_types::{H160, H256, U256};
use prettytable::{cell, row, Table};
use structopt::StructOpt;

use repminer_config::config::{Config, StorageBackend};
use repminer_data_structures::{log_entry::LogEntry, reputation::ReputationKey};
use repminer_reputation::{fault::Honest, ReputationStateStore, UpdateLogReplayer};
use repminer_storage::{
    backends,
    storage::{Storage, WriteBatch},
};

use super::input;

/// Prefix shared by dispute progress and justification trees
const DISPUTE_PREFIX: &str = "dispute/";

#[derive(Debug, StructOpt)]
pub struct ReplayParams {
    /// Update log: a JSON list of entries, or with `--encoded` the hex of its wire encoding.
    #[structopt(long = "log", parse(from_os_str))]
    pub log: PathBuf,
    /// Read the update log as hex instead of JSON.
    #[structopt(long = "encoded")]
    pub encoded: bool,
    /// Skill hierarchy: a JSON list of `{"id": .., "parent": ..}`, parents first.
    #[structopt(long = "skills", parse(from_os_str))]
    pub skills: PathBuf,
    /// Root of the stored state to start from. Starts from the empty state if omitted.
    #[structopt(long = "from", parse(try_from_str = input::parse_h256))]
    pub from: Option<H256>,
}

#[derive(Debug, StructOpt)]
pub struct ProofParams {
    /// Root of the stored state.
    #[structopt(long = "root", parse(try_from_str = input::parse_h256))]
    pub root: H256,
    #[structopt(long = "colony", parse(try_from_str = input::parse_h160))]
    pub colony: H160,
    /// Skill id, decimal or 0x-prefixed hexadecimal.
    #[structopt(long = "skill", parse(try_from_str = input::parse_u256))]
    pub skill: U256,
    /// User address. Omit it for the colony-wide reputation.
    #[structopt(long = "user", parse(try_from_str = input::parse_h160))]
    pub user: Option<H160>,
}

#[derive(Debug, StructOpt)]
pub struct ShowParams {
    /// Root of the stored state to list. Lists the stored roots if omitted.
    #[structopt(long = "root", parse(try_from_str = input::parse_h256))]
    pub root: Option<H256>,
}

/// Open the backend selected in the configuration
pub fn open_storage(config: &Config) -> anyhow::Result<Box<dyn Storage>> {
    match config.storage.backend {
        StorageBackend::HashMap => Ok(Box::new(backends::hashmap::Backend::default())),
        StorageBackend::BTreeMap => Ok(Box::new(backends::btreemap::Backend::default())),
        StorageBackend::RocksDb => open_rocksdb(config),
    }
}

#[cfg(feature = "rocksdb-backend")]
fn open_rocksdb(config: &Config) -> anyhow::Result<Box<dyn Storage>> {
    let path = config.storage.db_path.as_path();
    log::debug!("Opening RocksDB at {}", path.display());

    Ok(Box::new(backends::rocksdb::Backend::open_default(path)?))
}

#[cfg(not(feature = "rocksdb-backend"))]
fn open_rocksdb(_config: &Config) -> anyhow::Result<Box<dyn Storage>> {
    anyhow::bail!("RocksDB storage requires building with the `rocksdb-backend` feature")
}

fn warn_if_volatile(config: &Config) {
    if config.storage.backend != StorageBackend::RocksDb {
        log::warn!(
            "Storage backend {:?} is volatile, nothing is kept after this command",
            config.storage.backend
        );
    }
}

/// State stored under `root`, or the empty state
pub fn starting_state(
    storage: &dyn Storage,
    root: Option<H256>,
) -> anyhow::Result<ReputationStateStore> {
    match root {
        Some(root) if root != ReputationStateStore::new().root_hash() => {
            Ok(ReputationStateStore::load(storage, &root)?)
        }
        _ => Ok(ReputationStateStore::new()),
    }
}

pub fn replayer(config: &Config, skills: &Path) -> anyhow::Result<UpdateLogReplayer> {
    let skills = input::read_skills(skills)?;

    Ok(UpdateLogReplayer::with_decay(
        config.mining.decay_numerator,
        config.mining.decay_denominator,
        skills,
    )?)
}

pub fn replay(params: ReplayParams, config: &Config) -> anyhow::Result<()> {
    warn_if_volatile(config);
    let storage = open_storage(config)?;
    let replayer = replayer(config, &params.skills)?;
    let entries = input::read_log(&params.log, params.encoded)?;
    let start = starting_state(&*storage, params.from)?;

    let result = replay_and_save(&*storage, &replayer, &start, &entries)?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}

fn replay_and_save(
    storage: &dyn Storage,
    replayer: &UpdateLogReplayer,
    start: &ReputationStateStore,
    entries: &[LogEntry],
) -> anyhow::Result<serde_json::Value> {
    let replay = replayer.replay(start, entries, &Honest)?;
    let root = replay.state.save(storage)?;
    replay.justification.save(storage)?;

    Ok(serde_json::json!({
        "root_hash": root,
        "n_nodes": replay.n_nodes(),
        "jrh": replay.jrh(),
        "jrh_n_nodes": replay.jrh_n_nodes(),
        "clamped_steps": replay.clamped.iter().map(|c| c.step).collect::<Vec<_>>(),
    }))
}

pub fn proof(params: ProofParams, config: &Config) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let state = ReputationStateStore::load(&*storage, &params.root)?;
    let key = ReputationKey::new(
        params.colony,
        params.skill,
        params.user.unwrap_or_else(H160::zero),
    );
    let proof = state.get_proof(&key);
    if !proof.is_present() {
        log::warn!("{} is not in state {}", key, hex::encode(params.root));
    }

    println!("{}", serde_json::to_string_pretty(&proof)?);

    Ok(())
}

pub fn show(params: ShowParams, config: &Config) -> anyhow::Result<()> {
    let storage = open_storage(config)?;

    let root = match params.root {
        Some(root) => root,
        None => {
            let roots = ReputationStateStore::saved_roots(&*storage)?;
            if roots.is_empty() {
                println!("No stored states");
            }
            for root in roots {
                println!("{}", hex::encode(root));
            }
            return Ok(());
        }
    };

    let state = ReputationStateStore::load(&*storage, &root)?;
    let mut reputations: Vec<_> = state.iter().collect();
    reputations.sort_by_key(|(_, reputation)| reputation.uid);

    let mut table = Table::new();
    table.set_format(*prettytable::format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    table.set_titles(row![r->"uid", "Colony", r->"Skill", "User", r->"Reputation"]);
    for (key, reputation) in reputations {
        let user = if key.is_colony_wide() {
            "(colony-wide)".to_string()
        } else {
            hex::encode(key.user)
        };
        table.add_row(row![
            r->reputation.uid,
            hex::encode(key.colony),
            r->key.skill_id,
            user,
            r->reputation.value,
        ]);
    }
    table.printstd();
    println!("{} reputations", state.n_nodes());

    Ok(())
}

pub fn reset(config: &Config) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let (snapshots, disputes) = reset_storage(&*storage)?;
    println!(
        "Deleted {} stored states and {} dispute records",
        snapshots, disputes
    );

    Ok(())
}

fn reset_storage(storage: &dyn Storage) -> anyhow::Result<(usize, usize)> {
    let snapshots = ReputationStateStore::delete_snapshots(storage)?;

    let mut batch = WriteBatch::default();
    for (key, _) in storage.prefix_iterator(DISPUTE_PREFIX.as_bytes())? {
        batch.delete(key);
    }
    let disputes = batch.batch.len();
    storage.write(batch)?;
    log::info!(
        "Deleted {} snapshots and {} dispute records",
        snapshots,
        disputes
    );

    Ok((snapshots, disputes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use repminer_data_structures::skill::SkillTree;
    use repminer_reputation::JustificationTree;

    fn replayer() -> UpdateLogReplayer {
        let mut skills = SkillTree::new();
        skills.add_root(U256::from(1)).unwrap();
        skills.add_skill(U256::from(2), U256::from(1)).unwrap();
        UpdateLogReplayer::with_decay(1, 2, skills).unwrap()
    }

    fn entries() -> Vec<LogEntry> {
        vec![LogEntry {
            user: H160::repeat_byte(1),
            colony: H160::repeat_byte(0xc0),
            skill_id: U256::from(2),
            amount: 100,
            n_updates: 4,
            n_previous_updates: 0,
        }]
    }

    #[test]
    fn replays_chain_from_stored_states() {
        let storage = backends::hashmap::Backend::default();
        let replayer = replayer();

        let first = replay_and_save(&storage, &replayer, &ReputationStateStore::new(), &entries())
            .unwrap();
        let root: H256 = serde_json::from_value(first["root_hash"].clone()).unwrap();
        assert_eq!(first["n_nodes"], 4);
        assert_eq!(first["jrh_n_nodes"], 5);

        // Decay halves every value before the second log lands
        let start = starting_state(&storage, Some(root)).unwrap();
        let second = replay_and_save(&storage, &replayer, &start, &entries()).unwrap();
        assert_eq!(second["jrh_n_nodes"], 9);
        let root: H256 = serde_json::from_value(second["root_hash"].clone()).unwrap();
        let state = starting_state(&storage, Some(root)).unwrap();
        let key = ReputationKey::new(H160::repeat_byte(0xc0), U256::from(1), H160::repeat_byte(1));
        assert_eq!(state.value_or_zero(&key), 150);

        let jrh: H256 = serde_json::from_value(second["jrh"].clone()).unwrap();
        assert_eq!(JustificationTree::load(&storage, &jrh).unwrap().n_nodes(), 9);
        assert_eq!(ReputationStateStore::saved_roots(&storage).unwrap().len(), 2);
    }

    #[cfg(feature = "rocksdb-backend")]
    #[test]
    fn states_survive_reopening_the_database() {
        let mut config = Config::default();
        config.storage.db_path =
            std::env::temp_dir().join(format!("repminer-states-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&config.storage.db_path);

        let root: H256 = {
            let storage = open_storage(&config).unwrap();
            let result =
                replay_and_save(&*storage, &replayer(), &ReputationStateStore::new(), &entries())
                    .unwrap();
            serde_json::from_value(result["root_hash"].clone()).unwrap()
        };

        let storage = open_storage(&config).unwrap();
        assert_eq!(ReputationStateStore::saved_roots(&*storage).unwrap(), vec![root]);
        assert_eq!(starting_state(&*storage, Some(root)).unwrap().n_nodes(), 4);
        drop(storage);
        std::fs::remove_dir_all(&config.storage.db_path).unwrap();
    }

    #[test]
    fn empty_root_is_the_empty_state() {
        let storage = backends::hashmap::Backend::default();
        let empty = ReputationStateStore::new().root_hash();

        assert_eq!(starting_state(&storage, Some(empty)).unwrap().n_nodes(), 0);
        assert_eq!(starting_state(&storage, None).unwrap().n_nodes(), 0);
        assert!(starting_state(&storage, Some(H256::repeat_byte(1))).is_err());
    }

    #[test]
    fn reset_deletes_states_and_disputes() {
        let storage = backends::hashmap::Backend::default();
        replay_and_save(&storage, &replayer(), &ReputationStateStore::new(), &entries()).unwrap();
        storage
            .put(b"dispute/progress/01".to_vec(), vec![1])
            .unwrap();

        // One snapshot, one justification tree and one progress record
        assert_eq!(reset_storage(&storage).unwrap(), (1, 2));
        assert!(ReputationStateStore::saved_roots(&storage).unwrap().is_empty());
        assert_eq!(reset_storage(&storage).unwrap(), (0, 0));
    }
}
