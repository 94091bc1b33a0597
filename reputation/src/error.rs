//! Error type definitions for the reputation module.

use ethereum_types::H256;
use thiserror::Error;

use repminer_data_structures::{reputation::ReputationKey, skill::SkillError};
use repminer_storage::error::StorageError;

/// The error type for operations in Reputation module
#[derive(Debug, Error)]
pub enum ReputationError {
    /// The update log cannot be replayed. Nothing from the replay is kept.
    #[error("malformed log entry {entry}: {reason}")]
    MalformedLog { entry: usize, reason: String },
    /// The key is not in the reputation state
    #[error("reputation {0} not found")]
    NotFound(ReputationKey),
    /// Stored reputations must be in `[0, MAX_REPUTATION]`
    #[error("reputation value {0} out of range")]
    ValueOutOfRange(i128),
    /// A key cannot change its uid
    #[error("reputation {key} has uid {current}, cannot overwrite it with uid {new}")]
    UidChanged {
        key: ReputationKey,
        current: u64,
        new: u64,
    },
    /// A step could not find the key it decays
    #[error("no reputation has uid {0}")]
    UnknownUid(u64),
    #[error("decay factor {numerator}/{denominator} is not in [0, 1]")]
    InvalidDecayRate { numerator: u64, denominator: u64 },
    #[error("no snapshot stored for root {0:?}")]
    SnapshotNotFound(H256),
    /// The stored snapshot does not hash to the root it is stored under
    #[error("snapshot stored for root {expected:?} hashes to {found:?}")]
    CorruptSnapshot { expected: H256, found: H256 },
    #[error("no justification tree stored for root {0:?}")]
    JustificationNotFound(H256),
    /// The justification tree has no step to challenge at this index
    #[error("step {step} cannot be challenged in a justification tree with {n_leaves} leaves")]
    StepOutOfRange { step: u64, n_leaves: u64 },
    #[error("skill tree error: {0}")]
    Skill(#[from] SkillError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for the reputation module
pub type Result<T> = std::result::Result<T, ReputationError>;
