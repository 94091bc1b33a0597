use std::collections::BTreeMap;
use std::sync::RwLock;

use repminer_storage::backends::{btreemap, hashmap};
use repminer_storage::error::StorageError;
use repminer_storage::storage::{Storage, StorageHelper, WriteBatch};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Progress {
    round: u64,
    bounds: (u64, u64),
    label: String,
}

fn progress() -> Progress {
    Progress {
        round: 2,
        bounds: (3, 9),
        label: "bisecting".to_string(),
    }
}

fn roundtrip_typed(storage: &dyn Storage) {
    storage.put_t(b"dispute/progress/a", &progress()).unwrap();
    let stored: Option<Progress> = storage.get_t(b"dispute/progress/a").unwrap();
    assert_eq!(stored, Some(progress()));

    let missing: Option<Progress> = storage.get_t(b"dispute/progress/b").unwrap();
    assert_eq!(missing, None);
}

#[test]
fn typed_values_in_every_backend() {
    roundtrip_typed(&btreemap::Backend::default());
    roundtrip_typed(&hashmap::Backend::default());
}

#[test]
fn decoding_wrong_type_fails() {
    let storage: RwLock<BTreeMap<Vec<u8>, Vec<u8>>> = RwLock::default();
    storage.put(b"k".to_vec(), vec![1]).unwrap();

    match storage.get_t::<Progress>(b"k") {
        Err(StorageError::Decode { key, .. }) => assert_eq!(key, "k"),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn typed_batch() {
    let storage = hashmap::Backend::default();
    let mut batch = WriteBatch::default();
    batch.put_t(b"x".to_vec(), &7u64).unwrap();
    batch.put_t(b"y".to_vec(), &progress()).unwrap();
    assert!(!batch.is_empty());
    Storage::write(&storage, batch).unwrap();

    assert_eq!(storage.get_t::<u64>(b"x").unwrap(), Some(7));
    assert_eq!(storage.get_t::<Progress>(b"y").unwrap(), Some(progress()));
}
