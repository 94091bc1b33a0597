//! Error type definitions for the dispute module.

use ethereum_types::{H160, H256};
use thiserror::Error;

use repminer_reputation::error::ReputationError;
use repminer_storage::error::StorageError;

use crate::engine::Phase;

/// Errors returned by an arbiter call
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ArbiterError {
    /// The arbiter rejected the call without changing its state. The reason is kept verbatim.
    #[error("call reverted: {0}")]
    Reverted(String),
    /// The call may or may not have reached the arbiter
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Result type of arbiter calls
pub type ArbiterResult<T> = std::result::Result<T, ArbiterError>;

/// The error type for operations in the dispute module
#[derive(Debug, Error)]
pub enum DisputeError {
    /// The local state machine does not allow this action yet
    #[error("cannot {action} while {phase:?}")]
    ProtocolOrder { phase: Phase, action: &'static str },
    /// The arbiter rejected a call. The engine must resync before acting again.
    #[error("arbiter rejected {action}: {reason}")]
    Reverted { action: &'static str, reason: String },
    #[error("{action} failed after {attempts} attempts: {msg}")]
    Transport {
        action: &'static str,
        attempts: u32,
        msg: String,
    },
    /// An earlier call was rejected and the engine has not resynced since
    #[error("local dispute state is stale, resync first")]
    NeedsResync,
    /// The justification tree of a live dispute is gone. The dispute cannot be answered.
    #[error("justification tree {0:?} was lost")]
    JustificationTreeLost(H256),
    #[error("no dispute progress stored for {0:?}")]
    NoProgress(H160),
    /// The arbiter does not know this submitter
    #[error("submission of {0:?} not found")]
    SubmissionNotFound(H160),
    #[error("dispute made no progress after {0} iterations")]
    Stalled(usize),
    #[error("reputation error: {0}")]
    Reputation(#[from] ReputationError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for the dispute module
pub type Result<T> = std::result::Result<T, DisputeError>;
