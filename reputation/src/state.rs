//! Reputation State Store
//!
//! Content-addressed map from reputation keys to `(value, uid)`. Two tries are kept: the
//! reputation trie itself, whose root is the state commitment, and an index from uid to key
//! used to walk keys in creation order. Both are persistent, so cloning a store is cheap and the
//! clone is unaffected by later writes to the original.

use ethereum_types::{H256, U256};
use serde::{Deserialize, Serialize};

use repminer_crypto::{
    patricia::PatriciaTree,
    proof::index_path,
};
use repminer_data_structures::{
    proof::ReputationProof,
    reputation::{ReputationKey, ReputationValue, MAX_REPUTATION},
};
use repminer_storage::storage::{Storage, StorageHelper, WriteBatch};

use crate::error::{ReputationError, Result};

/// Storage prefix of every snapshot
pub const SNAPSHOT_PREFIX: &str = "snapshot/";

/// Storage key of the snapshot with root `root`
pub fn snapshot_key(root: &H256) -> Vec<u8> {
    format!("{}{}", SNAPSHOT_PREFIX, hex::encode(root)).into_bytes()
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    // In uid order
    reputations: Vec<(ReputationKey, ReputationValue)>,
}

/// Versioned reputation state
#[derive(Clone, Debug, Default)]
pub struct ReputationStateStore {
    trie: PatriciaTree<ReputationValue>,
    uids: PatriciaTree<ReputationKey>,
    highest_uid: u64,
}

impl ReputationStateStore {
    /// Empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a reputation. A key that already exists keeps its uid: writing it with any other
    /// uid is an error.
    pub fn insert(&mut self, key: ReputationKey, value: i128, uid: u64) -> Result<()> {
        if !(0..=MAX_REPUTATION).contains(&value) {
            return Err(ReputationError::ValueOutOfRange(value));
        }
        if uid == 0 {
            return Err(ReputationError::UnknownUid(uid));
        }
        let path = key.path();
        match self.trie.get(&path) {
            Some(current) if current.uid != uid => {
                return Err(ReputationError::UidChanged {
                    key,
                    current: current.uid,
                    new: uid,
                });
            }
            Some(_) => {}
            None => {
                self.uids.insert(index_path(U256::from(uid)), key);
            }
        }
        self.trie.insert(path, ReputationValue { value, uid });
        self.highest_uid = self.highest_uid.max(uid);

        Ok(())
    }

    /// Reputation stored under `key`
    pub fn get(&self, key: &ReputationKey) -> Result<ReputationValue> {
        self.find(key).ok_or(ReputationError::NotFound(*key))
    }

    /// Reputation stored under `key`, if any
    pub fn find(&self, key: &ReputationKey) -> Option<ReputationValue> {
        self.trie.get(&key.path()).copied()
    }

    /// Value stored under `key`, 0 when absent
    pub fn value_or_zero(&self, key: &ReputationKey) -> i128 {
        self.find(key).map(|reputation| reputation.value).unwrap_or(0)
    }

    /// Proof of `key` against `root_hash()`, whether the key exists or not
    pub fn get_proof(&self, key: &ReputationKey) -> ReputationProof {
        let proof = self.trie.proof(&key.path());
        match self.find(key) {
            Some(reputation) => ReputationProof::present(*key, reputation, proof),
            None => ReputationProof::absent(*key, proof),
        }
    }

    pub fn root_hash(&self) -> H256 {
        self.trie.root_hash()
    }

    /// Number of keys
    pub fn n_nodes(&self) -> u64 {
        self.trie.len() as u64
    }

    /// Highest uid ever assigned in this state
    pub fn highest_uid(&self) -> u64 {
        self.highest_uid
    }

    /// Key created with `uid`
    pub fn key_by_uid(&self, uid: u64) -> Option<ReputationKey> {
        self.uids.get(&index_path(U256::from(uid))).copied()
    }

    /// Every reputation, in uid order
    pub fn iter(&self) -> impl Iterator<Item = (ReputationKey, ReputationValue)> + '_ {
        self.uids
            .iter()
            .filter_map(move |(_, key)| self.find(key).map(|reputation| (*key, reputation)))
    }

    /// Forget every reputation
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Store this state under its root hash
    pub fn save(&self, storage: &dyn Storage) -> Result<H256> {
        let root = self.root_hash();
        let snapshot = Snapshot {
            reputations: self.iter().collect(),
        };
        storage.put_t(&snapshot_key(&root), &snapshot)?;
        log::debug!(
            "Saved snapshot {} with {} reputations",
            hex::encode(root),
            snapshot.reputations.len()
        );

        Ok(root)
    }

    /// Load the state stored under `root`
    pub fn load(storage: &dyn Storage, root: &H256) -> Result<Self> {
        let snapshot: Snapshot = storage
            .get_t(&snapshot_key(root))?
            .ok_or(ReputationError::SnapshotNotFound(*root))?;

        let mut state = Self::new();
        for (key, reputation) in snapshot.reputations {
            state.insert(key, reputation.value, reputation.uid)?;
        }
        let found = state.root_hash();
        if found != *root {
            return Err(ReputationError::CorruptSnapshot {
                expected: *root,
                found,
            });
        }
        log::debug!(
            "Loaded snapshot {} with {} reputations",
            hex::encode(root),
            state.n_nodes()
        );

        Ok(state)
    }

    /// Roots of every snapshot in `storage`
    pub fn saved_roots(storage: &dyn Storage) -> Result<Vec<H256>> {
        Ok(storage
            .prefix_iterator(SNAPSHOT_PREFIX.as_bytes())?
            .filter_map(|(key, _)| {
                let hex_root = key.get(SNAPSHOT_PREFIX.len()..)?;
                let bytes = hex::decode(hex_root).ok()?;
                (bytes.len() == 32).then(|| H256::from_slice(&bytes))
            })
            .collect())
    }

    /// Delete every snapshot in `storage`, returning how many there were
    pub fn delete_snapshots(storage: &dyn Storage) -> Result<usize> {
        let mut batch = WriteBatch::default();
        for (key, _) in storage.prefix_iterator(SNAPSHOT_PREFIX.as_bytes())? {
            batch.delete(key);
        }
        let deleted = batch.batch.len();
        storage.write(batch)?;

        Ok(deleted)
    }
}
