//! Error types for the snapshot store.

use crate::types::{CheckpointId, ChunkId};
use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Chunk not found: {0}")]
    ChunkNotFound(ChunkId),

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(CheckpointId),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Branch already exists: {0}")]
    BranchExists(String),

    #[error("Parent checkpoint not found: {0}")]
    ParentNotFound(CheckpointId),

    #[error("Branch {branch} head moved: expected {expected:?}, found {actual:?}")]
    Conflict {
        branch: String,
        expected: Option<CheckpointId>,
        actual: Option<CheckpointId>,
    },

    #[error("Chunk still referenced: {0}")]
    StillReferenced(ChunkId),

    #[error("Corrupt encoding: {0}")]
    CorruptEncoding(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Hash mismatch: expected {expected}, got {got}")]
    HashMismatch { expected: ChunkId, got: ChunkId },

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl StoreError {
    /// Whether the caller should retry with a fresh base.
    ///
    /// Only `Conflict` is retryable: re-read the branch head, re-resolve the
    /// commit against the new head's tree, and commit again. Every other kind
    /// indicates corruption, misuse, or a backend outage.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
