//! Dispute resolution
//!
//! Client side of the tournament in which miners that disagree on the result of a cycle are
//! paired and bisect their justification trees until a single step is left to prove. The
//! arbiter is an external collaborator behind the `Arbiter` trait; `LocalArbiter` implements
//! the same rules in memory.

#![deny(rust_2018_idioms)]
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]

pub mod arbiter;
pub mod engine;
/// Module containing error definitions
pub mod error;
pub mod local;
pub mod progress;
pub mod retry;
pub mod tournament;

pub use arbiter::{Arbiter, ChallengeOutcome};
pub use engine::{DisputeEngine, Phase};
pub use local::LocalArbiter;
