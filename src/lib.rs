//! # Epoch Store
//!
//! A branchable, content-addressed snapshot store: the versioning core of a
//! cloud-scale file store, in the spirit of a Git commit graph layered over
//! a data-lake transaction log.
//!
//! ## Core Concepts
//!
//! - **Chunks**: Immutable, deduplicated, content-addressed byte blobs
//! - **Trees**: Full snapshots of the path → content mapping
//! - **Checkpoints**: Tamper-evident records forming the commit graph
//! - **Branches**: Named pointers advanced by atomic compare-and-swap
//! - **GC**: Mark-and-sweep reclamation of unreachable data
//!
//! ## Example
//!
//! ```ignore
//! use epoch_store::{Store, Tree};
//!
//! let store = Store::open_path("./my-store")?;
//!
//! // Write content and commit a snapshot
//! let file = store.store_file("/a.txt", b"hello")?;
//! let mut tree = Tree::new();
//! tree.push(file);
//! let c1 = store.commit("main", None, &tree)?;
//!
//! // Fork a branch; it shares all data up to the fork point
//! store.fork("experiment", "main")?;
//!
//! // Reclaim anything no branch or pin can reach
//! store.run_gc(&[])?;
//! ```

pub mod backend;
pub mod branches;
pub mod checkpoints;
pub mod chunks;
pub mod error;
pub mod events;
pub mod gc;
pub mod store;
pub mod tree;
pub mod types;

// Re-exports
pub use backend::{FsBackend, MemoryBackend, ObjectInfo, StorageBackend};
pub use branches::{Branch, BranchManager, MAIN_BRANCH};
pub use checkpoints::CheckpointLog;
pub use chunks::ChunkStore;
pub use error::{Result, StoreError};
pub use events::{DropReason, EventManager, StoreEvent, SubscriptionHandle, SubscriptionId};
pub use gc::{GarbageCollector, GcResult};
pub use store::{Store, StoreConfig};
pub use tree::TreeCodec;
pub use types::*;
