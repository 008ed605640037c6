#![forbid(unsafe_code)]

//! Error types for persistence and the commit protocol.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure inside a [`StorageBackend`](crate::storage::StorageBackend).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("stored data at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("failed to encode value")]
    Encode(#[from] serde_json::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the history store and the mask layer.
#[derive(Debug, Error)]
pub enum FogError {
    /// The write failed after every retry; pending ops were kept.
    #[error("failed to persist `{key}`")]
    StorageWrite {
        key: String,
        #[source]
        source: StorageError,
    },
    #[error("failed to read `{key}`")]
    StorageRead {
        key: String,
        #[source]
        source: StorageError,
    },
    /// The stored history could not be decoded at all.
    #[error("history snapshot is malformed")]
    MalformedSnapshot(#[source] serde_json::Error),
    #[error("failed to encode history")]
    Encode(#[source] serde_json::Error),
}

impl FogError {
    /// Whether local state was left untouched and the call can be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageWrite { .. } | Self::StorageRead { .. })
    }
}
