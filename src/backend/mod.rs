//! Storage backend interface.
//!
//! The core talks to physical storage through a small key-value blob
//! interface plus one conditional-write primitive for branch refs. An object
//! store driver (S3, GCS, Azure) plugs in here; two reference backends ship
//! in-tree for local use and tests.

mod fs;
mod memory;

pub use fs::FsBackend;
pub use memory::MemoryBackend;

use crate::error::Result;
use crate::types::Timestamp;

/// Metadata for one stored object, as reported by [`StorageBackend::list`].
#[derive(Clone, Debug)]
pub struct ObjectInfo {
    /// Full key of the object.
    pub key: String,
    /// Stored size in bytes.
    pub size: u64,
    /// When the object was first written.
    pub created: Timestamp,
}

/// Key-value blob storage consumed by the core.
///
/// Implementations must provide read-after-write consistency for a given key
/// once `put` returns. Keys are `/`-separated UTF-8 paths; values are opaque.
/// `compare_and_swap` is the only primitive that must be atomic — it backs
/// the branch-ref serialization point.
pub trait StorageBackend: Send + Sync {
    /// Write an object. Overwrites any existing value under the key.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Read an object. Returns `None` if the key is absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete an object. Returns whether the key existed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// List objects whose keys start with `prefix`.
    fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;

    /// Atomically replace the value under `key` if its current value equals
    /// `expected` (`None` = key must be absent). Returns whether the swap
    /// happened.
    fn compare_and_swap(&self, key: &str, expected: Option<&[u8]>, new: &[u8]) -> Result<bool>;
}
