use ethereum_types::{H160, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use repminer_crypto::hash::u256_to_bytes;

use crate::reputation::{i128_word, u64_word, ReputationKey};

/// Length of one encoded log entry: user, colony, skill id, amount, nUpdates and
/// nPreviousUpdates
pub const LOG_ENTRY_LENGTH: usize = 20 + 20 + 32 + 32 + 32 + 32;

/// Errors found while decoding the update log
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogError {
    /// The log is not a whole number of entries
    #[error("log entry must be {expected} bytes long, found {found}")]
    WrongLength { expected: usize, found: usize },
    /// Update counts are kept as `u64`
    #[error("{field} does not fit in 64 bits")]
    CountOverflow { field: &'static str },
}

/// One reputation update, as found in the external log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Address whose reputation changes
    pub user: H160,
    /// Colony the reputation belongs to
    pub colony: H160,
    /// Skill named by the update. Ancestors, and children for losses, are updated as well.
    pub skill_id: U256,
    /// Signed change in reputation. The log carries 256-bit amounts; anything outside the
    /// `i128` range saturates, which yields the same result after clamping.
    pub amount: i128,
    /// Number of update steps this entry expands into
    pub n_updates: u64,
    /// Sum of `n_updates` of every earlier entry in the same log
    pub n_previous_updates: u64,
}

impl LogEntry {
    /// Key of the user in the named skill
    pub fn user_key(&self) -> ReputationKey {
        ReputationKey::new(self.colony, self.skill_id, self.user)
    }

    /// Colony-wide key of the named skill
    pub fn colony_wide_key(&self) -> ReputationKey {
        ReputationKey::new(self.colony, self.skill_id, H160::zero())
    }

    /// Fixed-layout encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(LOG_ENTRY_LENGTH);
        bytes.extend_from_slice(self.user.as_bytes());
        bytes.extend_from_slice(self.colony.as_bytes());
        bytes.extend_from_slice(&u256_to_bytes(&self.skill_id));
        bytes.extend_from_slice(&i128_word(self.amount));
        bytes.extend_from_slice(&u64_word(self.n_updates));
        bytes.extend_from_slice(&u64_word(self.n_previous_updates));

        bytes
    }

    /// Decode one fixed-layout entry
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LogError> {
        if bytes.len() != LOG_ENTRY_LENGTH {
            return Err(LogError::WrongLength {
                expected: LOG_ENTRY_LENGTH,
                found: bytes.len(),
            });
        }

        Ok(LogEntry {
            user: H160::from_slice(&bytes[0..20]),
            colony: H160::from_slice(&bytes[20..40]),
            skill_id: U256::from_big_endian(&bytes[40..72]),
            amount: saturating_i128(&bytes[72..104]),
            n_updates: count(&bytes[104..136], "nUpdates")?,
            n_previous_updates: count(&bytes[136..168], "nPreviousUpdates")?,
        })
    }
}

/// Decode a sequence of concatenated entries
pub fn decode_log(bytes: &[u8]) -> Result<Vec<LogEntry>, LogError> {
    if bytes.len() % LOG_ENTRY_LENGTH != 0 {
        return Err(LogError::WrongLength {
            expected: (bytes.len() / LOG_ENTRY_LENGTH + 1) * LOG_ENTRY_LENGTH,
            found: bytes.len(),
        });
    }

    bytes
        .chunks(LOG_ENTRY_LENGTH)
        .map(LogEntry::from_bytes)
        .collect()
}

/// Encode a sequence of entries, the inverse of `decode_log`
pub fn encode_log(entries: &[LogEntry]) -> Vec<u8> {
    entries.iter().flat_map(LogEntry::to_bytes).collect()
}

/// Total number of update steps declared by a log
pub fn total_updates(entries: &[LogEntry]) -> u64 {
    entries
        .last()
        .map(|entry| entry.n_previous_updates.saturating_add(entry.n_updates))
        .unwrap_or(0)
}

// Two's complement 256-bit word to i128, saturating
fn saturating_i128(word: &[u8]) -> i128 {
    let negative = word[0] & 0x80 != 0;
    let fill = if negative { 0xff } else { 0x00 };
    let fits = word[..16].iter().all(|b| *b == fill) && (word[16] & 0x80 != 0) == negative;
    if !fits {
        return if negative { i128::MIN } else { i128::MAX };
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);

    i128::from_be_bytes(low)
}

fn count(word: &[u8], field: &'static str) -> Result<u64, LogError> {
    if word[..24].iter().any(|b| *b != 0) {
        return Err(LogError::CountOverflow { field });
    }
    let mut low = [0u8; 8];
    low.copy_from_slice(&word[24..]);

    Ok(u64::from_be_bytes(low))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(amount: i128) -> LogEntry {
        LogEntry {
            user: H160::repeat_byte(1),
            colony: H160::repeat_byte(2),
            skill_id: U256::from(7),
            amount,
            n_updates: 4,
            n_previous_updates: 10,
        }
    }

    #[test]
    fn layout() {
        let bytes = entry(-2).to_bytes();
        assert_eq!(bytes.len(), LOG_ENTRY_LENGTH);
        assert_eq!(&bytes[0..20], &[1; 20]);
        assert_eq!(&bytes[20..40], &[2; 20]);
        assert_eq!(bytes[71], 7);
        assert_eq!(&bytes[72..103], &[0xff; 31]);
        assert_eq!(bytes[103], 0xfe);
        assert_eq!(bytes[135], 4);
        assert_eq!(bytes[167], 10);
        assert_eq!(LogEntry::from_bytes(&bytes), Ok(entry(-2)));
    }

    #[test]
    fn amounts_saturate() {
        let mut bytes = entry(0).to_bytes();
        // 2^255 - 1
        bytes[72] = 0x7f;
        bytes[73..104].copy_from_slice(&[0xff; 31]);
        assert_eq!(LogEntry::from_bytes(&bytes).unwrap().amount, i128::MAX);
        // -2^255
        bytes[72] = 0x80;
        bytes[73..104].copy_from_slice(&[0x00; 31]);
        assert_eq!(LogEntry::from_bytes(&bytes).unwrap().amount, i128::MIN);
        // 2^127 does not fit even though the upper half is zero
        bytes[72..104].copy_from_slice(&[0; 32]);
        bytes[88] = 0x80;
        assert_eq!(LogEntry::from_bytes(&bytes).unwrap().amount, i128::MAX);
    }

    #[test]
    fn huge_counts_are_rejected() {
        let mut bytes = entry(0).to_bytes();
        bytes[104] = 1;
        assert_eq!(
            LogEntry::from_bytes(&bytes),
            Err(LogError::CountOverflow { field: "nUpdates" })
        );
    }

    #[test]
    fn whole_log() {
        let entries = vec![entry(5), entry(-5)];
        let bytes = encode_log(&entries);
        assert_eq!(decode_log(&bytes), Ok(entries.clone()));
        assert_eq!(total_updates(&entries), 14);
        assert!(matches!(
            decode_log(&bytes[1..]),
            Err(LogError::WrongLength { .. })
        ));
        assert_eq!(total_updates(&[]), 0);
    }
}
