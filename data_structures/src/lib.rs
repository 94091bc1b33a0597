//! Data types shared by the replayer, the justification tree and the dispute protocol.

#![deny(rust_2018_idioms)]
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]

/// Reputation keys, values and the clamped arithmetic applied to them
pub mod reputation;

/// Entries of the reputation update log and their wire format
pub mod log_entry;

/// Skill hierarchy
pub mod skill;

/// Proofs of reputations and of justification tree leaves
pub mod proof;

/// Dispute submissions and the challenge response wire layout
pub mod dispute;
