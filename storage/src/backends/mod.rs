//! # Storage backends
//!
//! These modules implement the Storage trait for whatever struct
//! containing state for specific storage solutions (databases,
//! volatile memory, flat files, etc.).

pub mod btreemap;
pub mod hashmap;
#[cfg(feature = "rocksdb-backend")]
pub mod rocksdb;
