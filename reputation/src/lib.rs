//! Reputation engine
//!
//! Replays the reputation update log over the accepted state, one write per step, and records
//! every intermediate state in a justification tree that can later be used to win a dispute.

#![deny(rust_2018_idioms)]
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]

/// Module containing error definitions
pub mod error;

pub mod fault;
pub mod justification;
pub mod replay;
pub mod state;
pub mod update;

pub use justification::JustificationTree;
pub use replay::UpdateLogReplayer;
pub use state::ReputationStateStore;
