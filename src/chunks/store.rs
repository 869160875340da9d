//! Chunk store implementation.

use crate::backend::StorageBackend;
use crate::error::{Result, StoreError};
use crate::types::ChunkId;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Magic bytes for chunk objects.
const CHUNK_MAGIC: &[u8; 4] = b"CHK\0";

/// Current chunk format version.
const CHUNK_VERSION: u8 = 1;

/// Key prefix for chunk objects.
pub(crate) const CHUNK_PREFIX: &str = "chunks/";

/// Content-addressed, deduplicated chunk storage over a backend.
pub struct ChunkStore {
    backend: Arc<dyn StorageBackend>,

    /// LRU cache for recently read chunk content.
    cache: Mutex<LruCache<ChunkId, Vec<u8>>>,

    /// Set while a GC sweep is running; `delete` refuses otherwise.
    sweeping: AtomicBool,
}

impl ChunkStore {
    /// Create a chunk store over the given backend.
    pub fn new(backend: Arc<dyn StorageBackend>, cache_size: usize) -> Self {
        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap();
        Self {
            backend,
            cache: Mutex::new(LruCache::new(cache_size)),
            sweeping: AtomicBool::new(false),
        }
    }

    /// Store a chunk, returning its id.
    ///
    /// Idempotent: if content with the same id already exists, nothing is
    /// written and the existing id is returned.
    pub fn put(&self, content: &[u8]) -> Result<ChunkId> {
        let id = ChunkId::from_bytes(content);

        if self.exists(&id)? {
            return Ok(id);
        }

        let mut buf = Vec::with_capacity(content.len() + 17);
        buf.extend_from_slice(CHUNK_MAGIC);
        buf.push(CHUNK_VERSION);
        buf.extend_from_slice(&(content.len() as u64).to_le_bytes());
        buf.extend_from_slice(content);
        buf.extend_from_slice(&crc32fast::hash(content).to_le_bytes());

        self.backend.put(&self.chunk_key(&id), &buf)?;
        self.cache.lock().put(id, content.to_vec());

        Ok(id)
    }

    /// Get a chunk's content by id.
    pub fn get(&self, id: &ChunkId) -> Result<Vec<u8>> {
        if let Some(content) = self.cache.lock().get(id).cloned() {
            return Ok(content);
        }

        let raw = self
            .backend
            .get(&self.chunk_key(id))?
            .ok_or(StoreError::ChunkNotFound(*id))?;

        let content = Self::decode_object(id, &raw)?;
        self.cache.lock().put(*id, content.clone());
        Ok(content)
    }

    /// Check if a chunk exists.
    pub fn exists(&self, id: &ChunkId) -> Result<bool> {
        if self.cache.lock().contains(id) {
            return Ok(true);
        }
        Ok(self.backend.get(&self.chunk_key(id))?.is_some())
    }

    /// Delete a chunk.
    ///
    /// Only legal during a GC sweep; any other caller gets `StillReferenced`.
    /// Ownership of deletion is enforced by the collector, this check is a
    /// guard against misuse. Returns whether the chunk existed.
    pub fn delete(&self, id: &ChunkId) -> Result<bool> {
        if !self.sweeping.load(Ordering::Acquire) {
            return Err(StoreError::StillReferenced(*id));
        }

        self.cache.lock().pop(id);
        let existed = self.backend.delete(&self.chunk_key(id))?;
        if existed {
            debug!(chunk = %id, "swept chunk");
        }
        Ok(existed)
    }

    /// List all chunk ids with their storage metadata.
    pub fn list(&self) -> Result<Vec<(ChunkId, crate::backend::ObjectInfo)>> {
        let mut out = Vec::new();
        for info in self.backend.list(CHUNK_PREFIX)? {
            let hex = match info.key.rsplit('/').next() {
                Some(h) => h,
                None => continue,
            };
            if let Ok(id) = ChunkId::from_hex(hex) {
                out.push((id, info));
            }
        }
        Ok(out)
    }

    /// Number of stored chunks.
    pub fn chunk_count(&self) -> Result<u64> {
        Ok(self.list()?.len() as u64)
    }

    /// Total stored bytes (including per-chunk framing).
    pub fn total_bytes(&self) -> Result<u64> {
        Ok(self.list()?.iter().map(|(_, info)| info.size).sum())
    }

    /// Mark the start of a GC sweep, enabling `delete`.
    pub(crate) fn begin_sweep(&self) {
        self.sweeping.store(true, Ordering::Release);
    }

    /// Mark the end of a GC sweep.
    pub(crate) fn end_sweep(&self) {
        self.sweeping.store(false, Ordering::Release);
    }

    fn chunk_key(&self, id: &ChunkId) -> String {
        format!("{}{}/{}", CHUNK_PREFIX, id.shard_prefix(), id.to_hex())
    }

    /// Parse and verify a stored chunk object.
    fn decode_object(id: &ChunkId, raw: &[u8]) -> Result<Vec<u8>> {
        if raw.len() < 17 {
            return Err(StoreError::InvalidFormat("chunk object too short".into()));
        }
        if &raw[0..4] != CHUNK_MAGIC {
            return Err(StoreError::InvalidFormat("invalid chunk magic".into()));
        }
        if raw[4] != CHUNK_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "unsupported chunk version: {}",
                raw[4]
            )));
        }

        let len = u64::from_le_bytes(raw[5..13].try_into().unwrap()) as usize;
        if raw.len() != 17 + len {
            return Err(StoreError::InvalidFormat(format!(
                "chunk length mismatch: header says {}, object holds {}",
                len,
                raw.len().saturating_sub(17)
            )));
        }

        let content = &raw[13..13 + len];

        let stored_checksum = u32::from_le_bytes(raw[13 + len..].try_into().unwrap());
        let computed_checksum = crc32fast::hash(content);
        if stored_checksum != computed_checksum {
            return Err(StoreError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        let computed_id = ChunkId::from_bytes(content);
        if &computed_id != id {
            return Err(StoreError::HashMismatch {
                expected: *id,
                got: computed_id,
            });
        }

        Ok(content.to_vec())
    }
}
