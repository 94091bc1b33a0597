//! Configuration sections and their default values.
//!
//! Every struct derives `Deserialize` with `#[serde(default)]` at section level so that a
//! partial file, or an empty one, yields a complete `Config`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::defaults;

/// Errors found when checking a parsed configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The decay denominator cannot be zero
    #[error("mining.decay_denominator must be greater than zero")]
    ZeroDecayDenominator,
    /// Decay can only shrink values
    #[error("mining.decay_numerator ({numerator}) must not exceed mining.decay_denominator ({denominator})")]
    DecayAboveOne {
        /// Configured numerator
        numerator: u64,
        /// Configured denominator
        denominator: u64,
    },
    /// At least one attempt is needed to reach the arbiter
    #[error("dispute.retry_attempts must be at least 1")]
    NoRetryAttempts,
}

/// The entire configuration obtained by parsing a configuration file
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Logging-related configuration
    #[serde(default)]
    pub log: Log,
    /// Storage-related configuration
    #[serde(default)]
    pub storage: Storage,
    /// Replay parameters
    #[serde(default)]
    pub mining: Mining,
    /// Dispute client parameters
    #[serde(default)]
    pub dispute: Dispute,
}

impl Config {
    /// Check the values that cannot be expressed by the field types alone
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.mining.decay_denominator == 0 {
            return Err(ValidationError::ZeroDecayDenominator);
        }
        if self.mining.decay_numerator > self.mining.decay_denominator {
            return Err(ValidationError::DecayAboveOne {
                numerator: self.mining.decay_numerator,
                denominator: self.mining.decay_denominator,
            });
        }
        if self.dispute.retry_attempts == 0 {
            return Err(ValidationError::NoRetryAttempts);
        }

        Ok(())
    }
}

/// Logging-specific configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Log {
    /// Level for the `repminer` crates
    pub level: log::LevelFilter,
}

impl Default for Log {
    fn default() -> Self {
        Log {
            level: defaults::log_level(),
        }
    }
}

/// Available storage backends
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageBackend {
    /// Volatile, keys in hash order
    HashMap,
    /// Volatile, keys in lexicographical order
    BTreeMap,
    /// Persistent, requires the `rocksdb-backend` feature, which is on by default
    #[serde(rename = "RocksDB")]
    RocksDb,
}

/// Storage-specific configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Storage {
    /// Backend used for snapshots and dispute progress
    pub backend: StorageBackend,
    /// Path to the directory that will contain the database. Used only if backend is RocksDB.
    pub db_path: PathBuf,
}

impl Default for Storage {
    fn default() -> Self {
        Storage {
            backend: StorageBackend::RocksDb,
            db_path: defaults::storage_db_path(),
        }
    }
}

/// Parameters of the update log replay
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Mining {
    /// Numerator of the decay factor applied to every reputation once per cycle
    pub decay_numerator: u64,
    /// Denominator of the decay factor
    pub decay_denominator: u64,
}

impl Default for Mining {
    fn default() -> Self {
        Mining {
            decay_numerator: defaults::mining_decay_numerator(),
            decay_denominator: defaults::mining_decay_denominator(),
        }
    }
}

/// Parameters of the dispute client and of the local arbiter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Dispute {
    /// Attempts per arbiter call when the transport fails
    pub retry_attempts: u32,
    /// Delay before the first retry, in milliseconds
    pub retry_backoff_ms: u64,
    /// Duration of the submission window, in seconds
    pub submission_window_secs: u64,
    /// Time an opponent has to answer before it can be invalidated, in seconds
    pub response_window_secs: u64,
}

impl Default for Dispute {
    fn default() -> Self {
        Dispute {
            retry_attempts: defaults::dispute_retry_attempts(),
            retry_backoff_ms: defaults::dispute_retry_backoff_ms(),
            submission_window_secs: defaults::dispute_submission_window_secs(),
            response_window_secs: defaults::dispute_response_window_secs(),
        }
    }
}
