//! Error type definitions for the Storage module.

use thiserror::Error;

/// Errors while operating on a storage backend
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not complete the operation
    #[error("{backend} backend failed: {msg}")]
    Backend {
        /// Name of the backend
        backend: &'static str,
        /// Error message from the backend
        msg: String,
    },
    /// A lock protecting an in-memory backend was poisoned
    #[error("mutex poison error")]
    MutexPoison,
    /// A value could not be converted into bytes
    #[error("failed to encode value for key {key:?}: {source}")]
    Encode {
        /// Key being written
        key: String,
        /// Underlying bincode error
        source: bincode::Error,
    },
    /// Bytes read from the backend could not be converted into a value
    #[error("failed to decode value for key {key:?}: {source}")]
    Decode {
        /// Key being read
        key: String,
        /// Underlying bincode error
        source: bincode::Error,
    },
}

impl<T> From<std::sync::PoisonError<T>> for StorageError {
    fn from(_err: std::sync::PoisonError<T>) -> Self {
        StorageError::MutexPoison
    }
}
