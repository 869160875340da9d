//! Core types for the snapshot store.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Content hash of a chunk (SHA-256).
///
/// The lowercase hex rendering is the stable id format: it is what goes on
/// the wire, into tree records, and into backend keys.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkId(pub [u8; 32]);

impl ChunkId {
    /// Compute the id of a chunk's content.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ChunkId(hasher.finalize().into())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(ChunkId(arr))
    }

    /// First two hex characters, used to shard the physical key layout.
    pub fn shard_prefix(&self) -> String {
        hex::encode(&self.0[0..1])
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Content-derived id of a checkpoint record.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CheckpointId(pub [u8; 32]);

impl CheckpointId {
    /// Compute the id of a checkpoint's encoded identity section.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        CheckpointId(hasher.finalize().into())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(CheckpointId(arr))
    }
}

impl fmt::Debug for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CheckpointId({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A single file inside a snapshot: a path plus the ordered chunks whose
/// concatenation reconstructs its content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    /// Path, unique within one snapshot.
    pub path: String,

    /// Ordered chunk ids; concatenated in order they yield the file bytes.
    pub chunks: Vec<ChunkId>,

    /// Total content size in bytes.
    pub size: u64,

    /// Last modification time of the content.
    pub last_modified: Timestamp,
}

impl File {
    /// Build a file entry from a path and its chunk list.
    pub fn new(path: impl Into<String>, chunks: Vec<ChunkId>, size: u64) -> Self {
        Self {
            path: path.into(),
            chunks,
            size,
            last_modified: Timestamp::now(),
        }
    }
}

/// One complete snapshot of the namespace: an ordered list of files.
///
/// Ordering is preserved exactly through encode/decode; it carries no meaning
/// beyond reproducibility.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    files: Vec<File>,
}

impl Tree {
    /// An empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from a list of files.
    pub fn from_files(files: Vec<File>) -> Self {
        Self { files }
    }

    /// Append a file entry.
    pub fn push(&mut self, file: File) {
        self.files.push(file);
    }

    /// The files in this snapshot, in order.
    pub fn files(&self) -> &[File] {
        &self.files
    }

    /// Look up a file by path.
    pub fn get(&self, path: &str) -> Option<&File> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Every chunk id referenced by any file, in encounter order.
    pub fn chunk_ids(&self) -> impl Iterator<Item = &ChunkId> {
        self.files.iter().flat_map(|f| f.chunks.iter())
    }
}

/// A durable checkpoint: one encoded snapshot plus its position in history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Content-derived id.
    pub id: CheckpointId,

    /// Parent checkpoints. Empty for the root; two entries for a future
    /// merge.
    pub parents: Vec<CheckpointId>,

    /// Ordered chunks holding the encoded tree.
    pub tree_chunks: Vec<ChunkId>,

    /// When the record was first written. Not part of the id.
    pub created_at: Timestamp,
}

/// Store statistics.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub chunk_count: u64,
    pub chunk_bytes: u64,
    pub checkpoint_count: u64,
    pub branch_count: u64,
}
