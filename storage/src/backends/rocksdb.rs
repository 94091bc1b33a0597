//! # Rocksdb storage backend
//!
//! Storage backend that persists data in the file system using a RocksDB database.
use crate::{
    error::StorageError,
    storage::{Result, Storage, StorageIterator, WriteBatch, WriteBatchItem},
};

/// Rocksdb backend
pub type Backend = rocksdb::DB;

fn backend_error(err: rocksdb::Error) -> StorageError {
    StorageError::Backend {
        backend: "rocksdb",
        msg: err.to_string(),
    }
}

impl Storage for Backend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Backend::get(self, key)
            .map(|opt| opt.map(|dbvec| dbvec.to_vec()))
            .map_err(backend_error)
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        Backend::put(self, key, value).map_err(backend_error)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        Backend::delete(self, key).map_err(backend_error)
    }

    fn prefix_iterator<'a, 'b: 'a>(&'a self, prefix: &'b [u8]) -> Result<StorageIterator<'a>> {
        Ok(Box::new(
            Backend::iterator(
                self,
                rocksdb::IteratorMode::From(prefix, rocksdb::Direction::Forward),
            )
            .take_while(move |(k, _v)| k.starts_with(prefix))
            .map(|(k, v)| (k.into(), v.into())),
        ))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut rocksdb_batch = rocksdb::WriteBatch::default();

        for item in batch.batch {
            match item {
                WriteBatchItem::Put(key, value) => {
                    rocksdb_batch.put(key, value).map_err(backend_error)?;
                }
                WriteBatchItem::Delete(key) => {
                    rocksdb_batch.delete(key).map_err(backend_error)?;
                }
            }
        }

        Backend::write(self, rocksdb_batch).map_err(backend_error)
    }
}
