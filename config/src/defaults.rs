//! # Default values
//!
//! Values used for every configuration field that is not present in the configuration file.

use std::path::PathBuf;

// When changing the defaults, remember to update `repminer.toml` in the repository root.

/// Name of the configuration file looked up by `dirs::find_config`
pub const CONFIG_FILE: &str = "repminer.toml";

/// Default log level
pub fn log_level() -> log::LevelFilter {
    log::LevelFilter::Info
}

/// Default path for the database
pub fn storage_db_path() -> PathBuf {
    PathBuf::from(".repminer")
}

/// Numerator of the per-cycle decay factor. Together with the denominator this halves a
/// reputation in roughly 90 cycles.
pub fn mining_decay_numerator() -> u64 {
    992_327_946_262_944
}

/// Denominator of the per-cycle decay factor
pub fn mining_decay_denominator() -> u64 {
    1_000_000_000_000_000
}

/// Number of times a call to the arbiter is attempted when the transport fails
pub fn dispute_retry_attempts() -> u32 {
    5
}

/// Delay before the first retry, doubled after every failed attempt
pub fn dispute_retry_backoff_ms() -> u64 {
    500
}

/// Time during which new root hashes are accepted after a cycle starts
pub fn dispute_submission_window_secs() -> u64 {
    3_600
}

/// Time an opponent has to respond before it can be invalidated
pub fn dispute_response_window_secs() -> u64 {
    600
}
