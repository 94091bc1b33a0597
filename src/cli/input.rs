//! Files and arguments given on the command line.

use std::{fs, path::Path};

use anyhow::{bail, Context};
use ethereum_types::{H160, H256, U256};
use serde::Deserialize;

use repminer_data_structures::{
    log_entry::{decode_log, LogEntry},
    skill::SkillTree,
};
use repminer_reputation::fault::{ExtraReputation, FaultInjector, WrongUid};

fn parse_fixed(s: &str, len: usize) -> anyhow::Result<Vec<u8>> {
    let bytes = hex::decode(s.trim_start_matches("0x"))?;
    if bytes.len() != len {
        bail!("expected {} bytes, found {}", len, bytes.len());
    }

    Ok(bytes)
}

pub fn parse_h256(s: &str) -> anyhow::Result<H256> {
    parse_fixed(s, 32).map(|bytes| H256::from_slice(&bytes))
}

pub fn parse_h160(s: &str) -> anyhow::Result<H160> {
    parse_fixed(s, 20).map(|bytes| H160::from_slice(&bytes))
}

/// Decimal, or hexadecimal with a `0x` prefix
pub fn parse_u256(s: &str) -> anyhow::Result<U256> {
    match s.strip_prefix("0x") {
        Some(hex) => Ok(U256::from_str_radix(hex, 16)?),
        None => Ok(U256::from_dec_str(s)?),
    }
}

#[derive(Deserialize)]
struct SkillSpec {
    id: U256,
    parent: Option<U256>,
}

/// Skill hierarchy from a JSON list of `{"id": .., "parent": ..}` objects, parents first
pub fn read_skills(path: &Path) -> anyhow::Result<SkillTree> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read skills from {}", path.display()))?;
    skills_from_str(&contents)
}

fn skills_from_str(contents: &str) -> anyhow::Result<SkillTree> {
    let specs: Vec<SkillSpec> = serde_json::from_str(contents)?;
    let mut skills = SkillTree::new();
    for spec in specs {
        match spec.parent {
            Some(parent) => skills.add_skill(spec.id, parent)?,
            None => skills.add_root(spec.id)?,
        }
    }

    Ok(skills)
}

/// Update log, either a JSON list of entries or the hex of its wire encoding
pub fn read_log(path: &Path, encoded: bool) -> anyhow::Result<Vec<LogEntry>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read update log from {}", path.display()))?;
    log_from_str(&contents, encoded)
}

fn log_from_str(contents: &str, encoded: bool) -> anyhow::Result<Vec<LogEntry>> {
    if encoded {
        let bytes = hex::decode(contents.trim().trim_start_matches("0x"))?;
        Ok(decode_log(&bytes)?)
    } else {
        Ok(serde_json::from_str(contents)?)
    }
}

/// Misbehaviour of a simulated miner: `extra:<step>:<amount>` or `uid:<step>:<uid>`
pub fn parse_fault(s: &str) -> anyhow::Result<Box<dyn FaultInjector>> {
    let parts: Vec<&str> = s.split(':').collect();
    match parts.as_slice() {
        ["extra", step, amount] => Ok(Box::new(ExtraReputation {
            step: step.parse()?,
            amount: amount.parse()?,
        })),
        ["uid", step, uid] => Ok(Box::new(WrongUid {
            step: step.parse()?,
            uid: uid.parse()?,
        })),
        _ => bail!("unknown fault `{}`, expected extra:<step>:<amount> or uid:<step>:<uid>", s),
    }
}
