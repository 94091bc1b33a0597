use std::fmt;

use ethereum_types::{H160, H256, U256};
use serde::{Deserialize, Serialize};

use repminer_crypto::{
    hash::{keccak256, u256_to_bytes},
    patricia::Leaf,
};

/// Length of the encoding of a `ReputationKey`: colony, skill id and user
pub const KEY_LENGTH: usize = 20 + 32 + 20;

/// Largest value a reputation can hold
pub const MAX_REPUTATION: i128 = i128::MAX;

/// Identifies one entry of the reputation trie
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReputationKey {
    /// Colony the reputation belongs to
    pub colony: H160,
    /// Skill the reputation is earned in
    pub skill_id: U256,
    /// Owner of the reputation, or zero for the colony-wide aggregate
    pub user: H160,
}

impl ReputationKey {
    /// Key of `user` in `skill_id` of `colony`
    pub fn new(colony: H160, skill_id: U256, user: H160) -> Self {
        ReputationKey {
            colony,
            skill_id,
            user,
        }
    }

    /// Fixed-width encoding `colony || skill_id || user`
    pub fn to_bytes(&self) -> [u8; KEY_LENGTH] {
        let mut bytes = [0u8; KEY_LENGTH];
        bytes[..20].copy_from_slice(self.colony.as_bytes());
        bytes[20..52].copy_from_slice(&u256_to_bytes(&self.skill_id));
        bytes[52..].copy_from_slice(self.user.as_bytes());

        bytes
    }

    /// Inverse of `to_bytes`. Returns `None` if the slice has the wrong length.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != KEY_LENGTH {
            return None;
        }

        Some(ReputationKey {
            colony: H160::from_slice(&bytes[..20]),
            skill_id: U256::from_big_endian(&bytes[20..52]),
            user: H160::from_slice(&bytes[52..]),
        })
    }

    /// Path of this key in the reputation trie
    pub fn path(&self) -> H256 {
        keccak256(&self.to_bytes())
    }

    /// The colony-wide aggregate for the same colony and skill
    pub fn colony_wide(&self) -> Self {
        ReputationKey {
            user: H160::zero(),
            ..*self
        }
    }

    /// Whether this is a colony-wide aggregate
    pub fn is_colony_wide(&self) -> bool {
        self.user.is_zero()
    }

    /// Same colony and user, different skill
    pub fn with_skill(&self, skill_id: U256) -> Self {
        ReputationKey { skill_id, ..*self }
    }
}

// Keys are also stored as leaves of the uid index of the reputation state
impl Leaf for ReputationKey {
    fn leaf_hash(&self) -> H256 {
        self.path()
    }
}

impl fmt::Display for ReputationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            hex::encode(self.colony),
            self.skill_id,
            hex::encode(self.user)
        )
    }
}

/// Reputation stored in a leaf of the trie
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationValue {
    /// Amount of reputation, always in `[0, MAX_REPUTATION]`
    pub value: i128,
    /// Creation order of the key, starting at 1. It never changes once assigned.
    pub uid: u64,
}

impl ReputationValue {
    /// 64-byte leaf encoding: `value` and `uid`, both as 32-byte big-endian words
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&i128_word(self.value));
        bytes[32..].copy_from_slice(&u64_word(self.uid));

        bytes
    }
}

impl Leaf for ReputationValue {
    fn leaf_hash(&self) -> H256 {
        keccak256(&self.to_bytes())
    }
}

/// Sign-extended 32-byte big-endian encoding of an `i128`
pub fn i128_word(value: i128) -> [u8; 32] {
    let fill = if value < 0 { 0xff } else { 0x00 };
    let mut word = [fill; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());

    word
}

/// 32-byte big-endian encoding of a `u64`
pub fn u64_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());

    word
}

/// Which bound, if any, was applied to a computed reputation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Clamp {
    /// The computed value was already in range
    None,
    /// The computed value was negative and was stored as 0
    ToZero,
    /// The computed value exceeded `MAX_REPUTATION`
    ToMax,
}

/// Reputation after applying the clamp policy, remembering whether it was needed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClampedValue {
    /// Value to store
    pub value: i128,
    /// Bound applied to reach `value`
    pub clamp: Clamp,
}

impl ClampedValue {
    /// A value that needed no clamping
    pub fn exact(value: i128) -> Self {
        ClampedValue {
            value,
            clamp: Clamp::None,
        }
    }
}

/// `clamp(old + amount)`. `old` is a stored reputation, so it is never negative and the sum can
/// only overflow upwards.
pub fn add_amount(old: i128, amount: i128) -> ClampedValue {
    match old.checked_add(amount) {
        None => ClampedValue {
            value: MAX_REPUTATION,
            clamp: Clamp::ToMax,
        },
        Some(value) if value < 0 => ClampedValue {
            value: 0,
            clamp: Clamp::ToZero,
        },
        Some(value) => ClampedValue::exact(value),
    }
}

/// Change applied to a child skill when a user loses `amount` (negative) in a parent skill in
/// which they have `origin` reputation, and they have `child` reputation in the child skill.
///
/// The loss is first bounded by what the user has in the parent, then scaled by the share of
/// the parent that the child represents, so the child never ends up above the parent.
pub fn child_delta(amount: i128, origin: i128, child: i128) -> i128 {
    if amount >= 0 || origin <= 0 || child <= 0 {
        return 0;
    }
    let adjusted = amount.max(-origin);
    let magnitude = U256::from(adjusted.unsigned_abs()) * U256::from(child.unsigned_abs())
        / U256::from(origin.unsigned_abs());

    // `magnitude <= child`, which fits in an i128
    -i128::try_from(magnitude.low_u128()).unwrap_or(MAX_REPUTATION)
}

/// Multiplicative decay applied to every reputation once per cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecayRate {
    numerator: u64,
    denominator: u64,
}

impl DecayRate {
    /// Decay by `numerator / denominator`. Returns `None` unless the factor is in `[0, 1]`.
    pub fn new(numerator: u64, denominator: u64) -> Option<Self> {
        if denominator == 0 || numerator > denominator {
            None
        } else {
            Some(DecayRate {
                numerator,
                denominator,
            })
        }
    }

    /// Numerator of the factor
    pub fn numerator(&self) -> u64 {
        self.numerator
    }

    /// Denominator of the factor
    pub fn denominator(&self) -> u64 {
        self.denominator
    }

    /// `value * numerator / denominator`, truncated
    pub fn apply(&self, value: i128) -> i128 {
        if value <= 0 {
            return 0;
        }
        let decayed =
            U256::from(value.unsigned_abs()) * U256::from(self.numerator) / U256::from(self.denominator);

        // The factor is at most 1, so the result is at most `value`
        i128::try_from(decayed.low_u128()).unwrap_or(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ReputationKey {
        ReputationKey::new(
            H160::repeat_byte(0xc0),
            U256::from(2),
            H160::repeat_byte(0x11),
        )
    }

    #[test]
    fn key_encoding() {
        let bytes = key().to_bytes();
        assert_eq!(&bytes[..20], &[0xc0; 20]);
        assert_eq!(bytes[51], 2);
        assert_eq!(&bytes[52..], &[0x11; 20]);
        assert_eq!(ReputationKey::from_bytes(&bytes), Some(key()));
        assert_eq!(ReputationKey::from_bytes(&bytes[1..]), None);
    }

    #[test]
    fn colony_wide_key_has_a_different_path() {
        let colony_wide = key().colony_wide();
        assert!(colony_wide.is_colony_wide());
        assert!(!key().is_colony_wide());
        assert_ne!(colony_wide.path(), key().path());
        assert_eq!(colony_wide.with_skill(U256::from(2)), colony_wide);
    }

    #[test]
    fn leaf_encoding() {
        let leaf = ReputationValue { value: 5, uid: 3 };
        let bytes = leaf.to_bytes();
        assert_eq!(bytes[31], 5);
        assert_eq!(bytes[63], 3);
        assert!(bytes[..31].iter().all(|b| *b == 0));
        assert_eq!(leaf.leaf_hash(), keccak256(&bytes));
    }

    #[test]
    fn words() {
        assert_eq!(i128_word(-1), [0xff; 32]);
        assert_eq!(i128_word(1)[31], 1);
        assert_eq!(u64_word(u64::MAX)[23], 0);
        assert_eq!(u64_word(u64::MAX)[24], 0xff);
    }

    #[test]
    fn clamping() {
        assert_eq!(add_amount(5, 10), ClampedValue::exact(15));
        assert_eq!(
            add_amount(5, -10),
            ClampedValue {
                value: 0,
                clamp: Clamp::ToZero
            }
        );
        assert_eq!(add_amount(5, -5), ClampedValue::exact(0));
        assert_eq!(
            add_amount(MAX_REPUTATION, 1),
            ClampedValue {
                value: MAX_REPUTATION,
                clamp: Clamp::ToMax
            }
        );
        assert_eq!(add_amount(0, i128::MIN).value, 0);
    }

    #[test]
    fn child_reduction_is_proportional() {
        // Losing half of the parent removes half of the child
        assert_eq!(child_delta(-50, 100, 40), -20);
        // A loss larger than the parent removes the whole child
        assert_eq!(child_delta(-500, 100, 40), -40);
        // Nothing to scale against
        assert_eq!(child_delta(-500, 0, 40), 0);
        // Gains never cascade to children
        assert_eq!(child_delta(10, 100, 40), 0);
        // Huge values do not overflow
        assert_eq!(
            child_delta(i128::MIN, MAX_REPUTATION, MAX_REPUTATION),
            -MAX_REPUTATION
        );
    }

    #[test]
    fn decay() {
        let rate = DecayRate::new(1, 2).unwrap();
        assert_eq!(rate.apply(0), 0);
        assert_eq!(rate.apply(1), 0);
        assert_eq!(rate.apply(7), 3);
        assert_eq!(rate.apply(MAX_REPUTATION), MAX_REPUTATION / 2);
        assert_eq!(DecayRate::new(3, 2), None);
        assert_eq!(DecayRate::new(0, 0), None);
    }

    #[test]
    fn default_decay_shrinks_values() {
        let rate = DecayRate::new(992_327_946_262_944, 1_000_000_000_000_000).unwrap();
        assert_eq!(rate.apply(1), 0);
        assert_eq!(rate.apply(1_000_000_000_000_000), 992_327_946_262_944);
    }
}
