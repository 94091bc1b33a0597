//! Module containing a `Storage` generic trait that can be implemented for different specific
//! storage backends, and helpers to store any serde type in it.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::StorageError;

/// Result type for the Storage module
pub type Result<T> = std::result::Result<T, StorageError>;

/// Iterator over the key/value pairs sharing a prefix
pub type StorageIterator<'a> = Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>;

/// Generic trait that exposes a very simple key/value CRUD API for data storage.
/// It can be easily implemented for any specific storage backend solution (databases,
/// volatile memory, flat files, etc.)
pub trait Storage {
    /// Get a value from the storage given its key
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Put a value in the storage
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()>;

    /// Delete a value from the storage
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Iterate over all the keys that start with the given prefix, in key order
    fn prefix_iterator<'a, 'b: 'a>(&'a self, prefix: &'b [u8]) -> Result<StorageIterator<'a>>;

    /// Atomically write a batch of operations
    fn write(&self, batch: WriteBatch) -> Result<()>;
}

/// Single write operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteBatchItem {
    /// Put a key/value pair
    Put(Vec<u8>, Vec<u8>),
    /// Delete a key
    Delete(Vec<u8>),
}

/// Collection of write operations applied together by `Storage::write`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    /// Operations in the order they will be applied
    pub batch: Vec<WriteBatchItem>,
}

impl WriteBatch {
    /// Add a put operation
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.batch.push(WriteBatchItem::Put(key, value));
    }

    /// Add a delete operation
    pub fn delete(&mut self, key: Vec<u8>) {
        self.batch.push(WriteBatchItem::Delete(key));
    }

    /// Serialize `value` with bincode and add a put operation
    pub fn put_t<T: Serialize>(&mut self, key: Vec<u8>, value: &T) -> Result<()> {
        let bytes = bincode::serialize(value).map_err(|source| StorageError::Encode {
            key: String::from_utf8_lossy(&key).into_owned(),
            source,
        })?;
        self.put(key, bytes);

        Ok(())
    }

    /// Whether the batch has no operations
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}

/// Helper trait to work on types instead of raw bytes. Values are encoded with bincode.
///
/// It is the caller's responsibility to make sure that the type signature is correct,
/// as trying to get a value of an incorrect type may lead to unexpected behaviour.
pub trait StorageHelper: Storage {
    /// Insert an element into the storage
    fn put_t<T: Serialize>(&self, key: &[u8], value: &T) -> Result<()> {
        let bytes = bincode::serialize(value).map_err(|source| StorageError::Encode {
            key: String::from_utf8_lossy(key).into_owned(),
            source,
        })?;
        log::trace!(
            "Storing {} bytes under {}",
            bytes.len(),
            String::from_utf8_lossy(key)
        );

        self.put(key.to_vec(), bytes)
    }

    /// Get an element from the storage
    fn get_t<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.get(key)? {
            None => Ok(None),
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|source| StorageError::Decode {
                    key: String::from_utf8_lossy(key).into_owned(),
                    source,
                }),
        }
    }
}

// Implement the above helper trait for all the storage backends
impl<S: Storage + ?Sized> StorageHelper for S {}
