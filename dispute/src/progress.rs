//! Dispute progress persisted between restarts.

use ethereum_types::H160;
use serde::{Deserialize, Serialize};

use repminer_data_structures::dispute::Submission;
use repminer_storage::storage::{Storage, StorageHelper};

use crate::{engine::Phase, error::Result};

/// Storage prefix of the progress of every submitter
pub const PROGRESS_PREFIX: &str = "dispute/progress/";

/// Storage key of the progress of `submitter`
pub fn progress_key(submitter: &H160) -> Vec<u8> {
    format!("{}{}", PROGRESS_PREFIX, hex::encode(submitter)).into_bytes()
}

/// Last known position of a submitter in the dispute
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeProgress {
    pub submitter: H160,
    pub phase: Phase,
    /// What was submitted, once the replay is done
    pub submission: Option<Submission>,
    pub round: u64,
    pub index: u64,
    pub lower_bound: u64,
    pub upper_bound: u64,
}

impl DisputeProgress {
    /// Progress of a submitter that has not submitted anything yet
    pub fn new(submitter: H160) -> Self {
        DisputeProgress {
            submitter,
            phase: Phase::Idle,
            submission: None,
            round: 0,
            index: 0,
            lower_bound: 0,
            upper_bound: 0,
        }
    }

    pub fn save(&self, storage: &dyn Storage) -> Result<()> {
        storage.put_t(&progress_key(&self.submitter), self)?;

        Ok(())
    }

    pub fn load(storage: &dyn Storage, submitter: &H160) -> Result<Option<Self>> {
        Ok(storage.get_t(&progress_key(submitter))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repminer_storage::backends::hashmap;

    #[test]
    fn save_and_load() {
        let storage = hashmap::Backend::default();
        let submitter = H160::repeat_byte(7);
        assert_eq!(DisputeProgress::load(&storage, &submitter).unwrap(), None);

        let mut progress = DisputeProgress::new(submitter);
        progress.phase = Phase::Bisecting;
        progress.upper_bound = 12;
        progress.save(&storage).unwrap();
        assert_eq!(
            DisputeProgress::load(&storage, &submitter).unwrap(),
            Some(progress)
        );
        assert_eq!(
            DisputeProgress::load(&storage, &H160::repeat_byte(8)).unwrap(),
            None
        );
    }
}
