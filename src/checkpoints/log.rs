//! Checkpoint log implementation.

use crate::backend::StorageBackend;
use crate::error::{Result, StoreError};
use crate::types::{CheckpointId, CheckpointRecord, ChunkId, Timestamp};
use std::sync::Arc;
use tracing::debug;

/// Magic bytes for checkpoint records.
const CHECKPOINT_MAGIC: &[u8; 4] = b"CKP\0";

/// Current checkpoint format version. Part of the hashed identity, so a
/// packing-policy change produces new ids instead of aliasing old history.
const CHECKPOINT_VERSION: u8 = 1;

/// Key prefix for checkpoint records.
pub(crate) const CHECKPOINT_PREFIX: &str = "checkpoints/";

/// Append-only registry of checkpoints keyed by content-derived id.
pub struct CheckpointLog {
    backend: Arc<dyn StorageBackend>,
}

impl CheckpointLog {
    /// Create a checkpoint log over the given backend.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Append a checkpoint referencing the given parents and tree chunks.
    ///
    /// The id is derived from the record content, so appending byte-identical
    /// input is idempotent: the existing id comes back and nothing is
    /// rewritten. Unknown parents fail with `ParentNotFound`; an empty parent
    /// list denotes the root.
    pub fn append(
        &self,
        parents: &[CheckpointId],
        tree_chunks: &[ChunkId],
    ) -> Result<CheckpointId> {
        for parent in parents {
            if !self.exists(parent)? {
                return Err(StoreError::ParentNotFound(*parent));
            }
        }

        let identity = encode_identity(parents, tree_chunks);
        let id = CheckpointId::from_bytes(&identity);

        if self.exists(&id)? {
            return Ok(id);
        }

        let mut buf = Vec::with_capacity(identity.len() + 16);
        buf.extend_from_slice(&identity);
        buf.extend_from_slice(&Timestamp::now().0.to_le_bytes());
        let checksum = crc32fast::hash(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());

        self.backend.put(&self.record_key(&id), &buf)?;
        debug!(checkpoint = %id, parents = parents.len(), "appended checkpoint");

        Ok(id)
    }

    /// Read a checkpoint record by id.
    pub fn read(&self, id: &CheckpointId) -> Result<CheckpointRecord> {
        let raw = self
            .backend
            .get(&self.record_key(id))?
            .ok_or(StoreError::CheckpointNotFound(*id))?;
        decode_record(id, &raw)
    }

    /// Check if a checkpoint exists.
    pub fn exists(&self, id: &CheckpointId) -> Result<bool> {
        Ok(self.backend.get(&self.record_key(id))?.is_some())
    }

    /// List all checkpoint ids with their storage metadata.
    pub fn list(&self) -> Result<Vec<(CheckpointId, crate::backend::ObjectInfo)>> {
        let mut out = Vec::new();
        for info in self.backend.list(CHECKPOINT_PREFIX)? {
            let hex = match info.key.rsplit('/').next() {
                Some(h) => h,
                None => continue,
            };
            if let Ok(id) = CheckpointId::from_hex(hex) {
                out.push((id, info));
            }
        }
        Ok(out)
    }

    /// Number of stored checkpoints.
    pub fn checkpoint_count(&self) -> Result<u64> {
        Ok(self.list()?.len() as u64)
    }

    /// Remove a checkpoint record. GC sweep only; nothing else may unlink
    /// history.
    pub(crate) fn remove(&self, id: &CheckpointId) -> Result<bool> {
        self.backend.delete(&self.record_key(id))
    }

    fn record_key(&self, id: &CheckpointId) -> String {
        format!("{}{}", CHECKPOINT_PREFIX, id.to_hex())
    }
}

/// Encode the hashed identity section: version, parents, tree chunks.
fn encode_identity(parents: &[CheckpointId], tree_chunks: &[ChunkId]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(CHECKPOINT_MAGIC);
    buf.push(CHECKPOINT_VERSION);

    buf.extend_from_slice(&(parents.len() as u32).to_le_bytes());
    for parent in parents {
        let hex = parent.to_hex();
        buf.extend_from_slice(&(hex.len() as u16).to_le_bytes());
        buf.extend_from_slice(hex.as_bytes());
    }

    buf.extend_from_slice(&(tree_chunks.len() as u32).to_le_bytes());
    for chunk in tree_chunks {
        let hex = chunk.to_hex();
        buf.extend_from_slice(&(hex.len() as u16).to_le_bytes());
        buf.extend_from_slice(hex.as_bytes());
    }

    buf
}

/// Parse and verify a stored checkpoint record.
fn decode_record(id: &CheckpointId, raw: &[u8]) -> Result<CheckpointRecord> {
    if raw.len() < 4 + 1 + 8 + 8 + 4 {
        return Err(StoreError::InvalidFormat(
            "checkpoint record too short".into(),
        ));
    }

    let body = &raw[..raw.len() - 4];
    let stored_checksum = u32::from_le_bytes(raw[raw.len() - 4..].try_into().unwrap());
    let computed_checksum = crc32fast::hash(body);
    if stored_checksum != computed_checksum {
        return Err(StoreError::ChecksumMismatch {
            expected: stored_checksum,
            got: computed_checksum,
        });
    }

    let identity = &body[..body.len() - 8];
    let created_at = Timestamp(i64::from_le_bytes(
        body[body.len() - 8..].try_into().unwrap(),
    ));

    // Tamper evidence: the stored record must hash back to its key.
    let computed_id = CheckpointId::from_bytes(identity);
    if &computed_id != id {
        return Err(StoreError::CorruptEncoding(format!(
            "checkpoint {} does not match its content digest",
            id
        )));
    }

    let mut pos = 0usize;

    if take(identity, &mut pos, 4)? != CHECKPOINT_MAGIC {
        return Err(StoreError::InvalidFormat("invalid checkpoint magic".into()));
    }
    let version = take(identity, &mut pos, 1)?[0];
    if version != CHECKPOINT_VERSION {
        return Err(StoreError::InvalidFormat(format!(
            "unsupported checkpoint version: {}",
            version
        )));
    }

    let parent_count = u32::from_le_bytes(take(identity, &mut pos, 4)?.try_into().unwrap()) as usize;
    let mut parents = Vec::with_capacity(parent_count);
    for _ in 0..parent_count {
        let hex_len = u16::from_le_bytes(take(identity, &mut pos, 2)?.try_into().unwrap()) as usize;
        let hex = std::str::from_utf8(take(identity, &mut pos, hex_len)?)
            .map_err(|_| StoreError::CorruptEncoding("parent id is not UTF-8".into()))?;
        parents.push(
            CheckpointId::from_hex(hex)
                .map_err(|_| StoreError::CorruptEncoding(format!("bad parent id: {}", hex)))?,
        );
    }

    let chunk_count = u32::from_le_bytes(take(identity, &mut pos, 4)?.try_into().unwrap()) as usize;
    let mut tree_chunks = Vec::with_capacity(chunk_count);
    for _ in 0..chunk_count {
        let hex_len = u16::from_le_bytes(take(identity, &mut pos, 2)?.try_into().unwrap()) as usize;
        let hex = std::str::from_utf8(take(identity, &mut pos, hex_len)?)
            .map_err(|_| StoreError::CorruptEncoding("chunk id is not UTF-8".into()))?;
        tree_chunks.push(
            ChunkId::from_hex(hex)
                .map_err(|_| StoreError::CorruptEncoding(format!("bad chunk id: {}", hex)))?,
        );
    }

    if pos != identity.len() {
        return Err(StoreError::CorruptEncoding(
            "trailing bytes in checkpoint record".into(),
        ));
    }

    Ok(CheckpointRecord {
        id: *id,
        parents,
        tree_chunks,
        created_at,
    })
}

/// Read `n` bytes from `bytes` at `*pos`, advancing the position.
fn take<'a>(bytes: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8]> {
    if *pos + n > bytes.len() {
        return Err(StoreError::CorruptEncoding(
            "checkpoint record truncated".into(),
        ));
    }
    let slice = &bytes[*pos..*pos + n];
    *pos += n;
    Ok(slice)
}
