//! Content-addressed chunk storage.
//!
//! Chunks are stored by their SHA-256 id, sharded by the first id byte
//! (like Git objects). Identical content is stored once; reads verify both
//! the checksum and the id.

mod store;

pub use store::ChunkStore;
