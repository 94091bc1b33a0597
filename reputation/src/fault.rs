//! Per-step overrides used to build dishonest replays for tests and simulations.

use std::fmt;

use repminer_data_structures::reputation::{ReputationKey, ReputationValue};

/// A write about to be performed by the replayer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Write {
    /// Step performing the write
    pub step: u64,
    pub key: ReputationKey,
    /// What an honest replay writes
    pub value: ReputationValue,
    /// Whether the key did not exist before this step
    pub created: bool,
}

/// Strategy deciding what is actually written at every step
pub trait FaultInjector: fmt::Debug {
    /// Reputation to store instead of `write.value`
    fn apply(&self, write: &Write) -> ReputationValue;
}

/// Writes exactly what the replay computed
#[derive(Clone, Copy, Debug, Default)]
pub struct Honest;

impl FaultInjector for Honest {
    fn apply(&self, write: &Write) -> ReputationValue {
        write.value
    }
}

/// Adds `amount` to the value written at `step`
#[derive(Clone, Copy, Debug)]
pub struct ExtraReputation {
    pub step: u64,
    pub amount: i128,
}

impl FaultInjector for ExtraReputation {
    fn apply(&self, write: &Write) -> ReputationValue {
        if write.step != self.step {
            return write.value;
        }

        ReputationValue {
            value: write.value.value.saturating_add(self.amount).max(0),
            ..write.value
        }
    }
}

/// Creates the key written at `step` with `uid` instead of the next free uid. Has no effect
/// if that step writes an existing key, since uids never change.
#[derive(Clone, Copy, Debug)]
pub struct WrongUid {
    pub step: u64,
    pub uid: u64,
}

impl FaultInjector for WrongUid {
    fn apply(&self, write: &Write) -> ReputationValue {
        if write.step != self.step || !write.created {
            return write.value;
        }

        ReputationValue {
            uid: self.uid,
            ..write.value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(step: u64, created: bool) -> Write {
        Write {
            step,
            key: ReputationKey::default(),
            value: ReputationValue { value: 10, uid: 4 },
            created,
        }
    }

    #[test]
    fn faults_only_hit_their_step() {
        let extra = ExtraReputation { step: 2, amount: 5 };
        assert_eq!(extra.apply(&write(1, false)).value, 10);
        assert_eq!(extra.apply(&write(2, false)).value, 15);

        let negative = ExtraReputation {
            step: 2,
            amount: -50,
        };
        assert_eq!(negative.apply(&write(2, false)).value, 0);

        let wrong_uid = WrongUid { step: 3, uid: 9 };
        assert_eq!(wrong_uid.apply(&write(3, true)).uid, 9);
        assert_eq!(wrong_uid.apply(&write(3, false)).uid, 4);
        assert_eq!(wrong_uid.apply(&write(2, true)).uid, 4);

        assert_eq!(Honest.apply(&write(3, true)), write(3, true).value);
    }
}
