//! Tree codec implementation.

use crate::chunks::ChunkStore;
use crate::error::{Result, StoreError};
use crate::types::{ChunkId, File, Timestamp, Tree};
use std::sync::Arc;

/// Magic bytes for tree chunks.
const TREE_MAGIC: &[u8; 4] = b"TRE\0";

/// Current tree encoding version.
const TREE_VERSION: u8 = 1;

/// Tree chunk header size: magic + version + record count.
const TREE_HEADER_SIZE: usize = 4 + 1 + 4;

/// Default packing budget per tree chunk.
const DEFAULT_TREE_CHUNK_BYTES: usize = 4 * 1024 * 1024;

/// Serializes trees into chunks and back.
pub struct TreeCodec {
    chunks: Arc<ChunkStore>,

    /// Packing budget: a new chunk starts once the current one would exceed
    /// this. A single record larger than the budget gets its own chunk.
    target_chunk_bytes: usize,
}

impl TreeCodec {
    /// Create a codec writing through the given chunk store.
    pub fn new(chunks: Arc<ChunkStore>) -> Self {
        Self::with_target_chunk_bytes(chunks, DEFAULT_TREE_CHUNK_BYTES)
    }

    /// Create a codec with a custom packing budget (mainly for tests).
    pub fn with_target_chunk_bytes(chunks: Arc<ChunkStore>, target_chunk_bytes: usize) -> Self {
        Self {
            chunks,
            target_chunk_bytes: target_chunk_bytes.max(TREE_HEADER_SIZE + 1),
        }
    }

    /// Encode a tree into chunks, returning their ids in order.
    ///
    /// An empty tree still produces one (empty) chunk so that decode has
    /// something to verify.
    pub fn encode(&self, tree: &Tree) -> Result<Vec<ChunkId>> {
        let mut chunk_ids = Vec::new();
        let mut records: Vec<Vec<u8>> = Vec::new();
        let mut pending_bytes = TREE_HEADER_SIZE;

        for file in tree.files() {
            let record = encode_record(file)?;
            let framed_len = 4 + record.len();

            if !records.is_empty() && pending_bytes + framed_len > self.target_chunk_bytes {
                chunk_ids.push(self.flush(&mut records)?);
                pending_bytes = TREE_HEADER_SIZE;
            }

            pending_bytes += framed_len;
            records.push(record);
        }

        chunk_ids.push(self.flush(&mut records)?);
        Ok(chunk_ids)
    }

    /// Decode a tree from its ordered chunk list.
    pub fn decode(&self, chunk_ids: &[ChunkId]) -> Result<Tree> {
        let mut files = Vec::new();

        for id in chunk_ids {
            let bytes = self.chunks.get(id)?;
            decode_chunk(&bytes, &mut files)?;
        }

        Ok(Tree::from_files(files))
    }

    /// Write the pending records out as one chunk.
    fn flush(&self, records: &mut Vec<Vec<u8>>) -> Result<ChunkId> {
        let body: usize = records.iter().map(|r| 4 + r.len()).sum();
        let mut buf = Vec::with_capacity(TREE_HEADER_SIZE + body);

        buf.extend_from_slice(TREE_MAGIC);
        buf.push(TREE_VERSION);
        buf.extend_from_slice(&(records.len() as u32).to_le_bytes());
        for record in records.drain(..) {
            buf.extend_from_slice(&(record.len() as u32).to_le_bytes());
            buf.extend_from_slice(&record);
        }

        self.chunks.put(&buf)
    }
}

/// Encode one file record.
fn encode_record(file: &File) -> Result<Vec<u8>> {
    let path = file.path.as_bytes();
    if path.len() > u16::MAX as usize {
        return Err(StoreError::InvalidFormat(format!(
            "path too long: {} bytes",
            path.len()
        )));
    }

    let mut buf = Vec::new();
    buf.extend_from_slice(&(path.len() as u16).to_le_bytes());
    buf.extend_from_slice(path);
    buf.extend_from_slice(&file.size.to_le_bytes());
    buf.extend_from_slice(&file.last_modified.0.to_le_bytes());
    buf.extend_from_slice(&(file.chunks.len() as u32).to_le_bytes());
    for id in &file.chunks {
        let hex = id.to_hex();
        buf.extend_from_slice(&(hex.len() as u16).to_le_bytes());
        buf.extend_from_slice(hex.as_bytes());
    }
    Ok(buf)
}

/// Parse one chunk's record stream, appending decoded files.
fn decode_chunk(bytes: &[u8], files: &mut Vec<File>) -> Result<()> {
    let mut cursor = Cursor::new(bytes);

    let magic = cursor.take(4)?;
    if magic != TREE_MAGIC {
        return Err(StoreError::CorruptEncoding("invalid tree magic".into()));
    }
    let version = cursor.u8()?;
    if version != TREE_VERSION {
        return Err(StoreError::CorruptEncoding(format!(
            "unsupported tree version: {}",
            version
        )));
    }

    let record_count = cursor.u32()?;
    for _ in 0..record_count {
        let record_len = cursor.u32()? as usize;
        let record = cursor.take(record_len)?;
        files.push(decode_record(record)?);
    }

    if !cursor.at_end() {
        return Err(StoreError::CorruptEncoding(
            "trailing bytes after last record".into(),
        ));
    }
    Ok(())
}

/// Parse one file record.
fn decode_record(bytes: &[u8]) -> Result<File> {
    let mut cursor = Cursor::new(bytes);

    let path_len = cursor.u16()? as usize;
    let path = std::str::from_utf8(cursor.take(path_len)?)
        .map_err(|_| StoreError::CorruptEncoding("path is not UTF-8".into()))?
        .to_string();
    let size = cursor.u64()?;
    let last_modified = Timestamp(cursor.i64()?);

    let chunk_count = cursor.u32()? as usize;
    let mut chunks = Vec::with_capacity(chunk_count);
    for _ in 0..chunk_count {
        let hex_len = cursor.u16()? as usize;
        let hex = std::str::from_utf8(cursor.take(hex_len)?)
            .map_err(|_| StoreError::CorruptEncoding("chunk id is not UTF-8".into()))?;
        let id = ChunkId::from_hex(hex)
            .map_err(|_| StoreError::CorruptEncoding(format!("bad chunk id: {}", hex)))?;
        chunks.push(id);
    }

    if !cursor.at_end() {
        return Err(StoreError::CorruptEncoding(
            "trailing bytes inside file record".into(),
        ));
    }

    Ok(File {
        path,
        chunks,
        size,
        last_modified,
    })
}

/// Bounds-checked reader over a byte slice.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(StoreError::CorruptEncoding("record stream truncated".into()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn at_end(&self) -> bool {
        self.pos == self.bytes.len()
    }
}
