//! Main Store struct tying all components together.

use crate::backend::{FsBackend, MemoryBackend, StorageBackend};
use crate::branches::{Branch, BranchManager};
use crate::checkpoints::CheckpointLog;
use crate::chunks::ChunkStore;
use crate::error::{Result, StoreError};
use crate::events::{EventManager, StoreEvent, SubscriptionHandle};
use crate::gc::{GarbageCollector, GcResult};
use crate::tree::TreeCodec;
use crate::types::{CheckpointId, CheckpointRecord, ChunkId, File, StoreStats, Tree};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Chunk read cache size (number of chunks).
    pub chunk_cache_size: usize,

    /// Packing budget per encoded tree chunk, in bytes.
    pub tree_chunk_bytes: usize,

    /// Split size for file content stored through `store_file`, in bytes.
    pub file_chunk_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_cache_size: 1024,
            tree_chunk_bytes: 4 * 1024 * 1024,
            file_chunk_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Backend key of the store manifest.
const MANIFEST_KEY: &str = "manifest";

/// Backend key of the persisted pin set.
const PINS_KEY: &str = "pins";

/// Magic bytes for the store manifest.
const STORE_MAGIC: &[u8; 4] = b"EST\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// Persisted pin set.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct PinSet {
    pinned: BTreeSet<CheckpointId>,
}

/// The snapshot store.
///
/// Provides a unified interface for:
/// - Writing and reading content chunks
/// - Committing tree snapshots as checkpoints
/// - Creating, forking, advancing and deleting branches
/// - Pinning checkpoints and collecting garbage
pub struct Store {
    config: StoreConfig,
    backend: Arc<dyn StorageBackend>,
    chunks: Arc<ChunkStore>,
    codec: Arc<TreeCodec>,
    checkpoints: Arc<CheckpointLog>,
    branches: Arc<BranchManager>,
    events: Arc<EventManager>,
    gc: GarbageCollector,
}

impl Store {
    /// Open a store over the given backend, initializing it on first use.
    pub fn open(backend: Arc<dyn StorageBackend>, config: StoreConfig) -> Result<Self> {
        Self::check_manifest(&*backend)?;

        let chunks = Arc::new(ChunkStore::new(
            Arc::clone(&backend),
            config.chunk_cache_size,
        ));
        let codec = Arc::new(TreeCodec::with_target_chunk_bytes(
            Arc::clone(&chunks),
            config.tree_chunk_bytes,
        ));
        let checkpoints = Arc::new(CheckpointLog::new(Arc::clone(&backend)));
        let branches = Arc::new(BranchManager::new(
            Arc::clone(&backend),
            Arc::clone(&checkpoints),
        ));
        let gc = GarbageCollector::new(
            Arc::clone(&chunks),
            Arc::clone(&codec),
            Arc::clone(&checkpoints),
            Arc::clone(&branches),
        );

        Ok(Self {
            config,
            backend,
            chunks,
            codec,
            checkpoints,
            branches,
            events: Arc::new(EventManager::new()),
            gc,
        })
    }

    /// Open a store on the local filesystem.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let backend = Arc::new(FsBackend::open(path)?) as Arc<dyn StorageBackend>;
        Self::open(backend, StoreConfig::default())
    }

    /// Open an ephemeral in-memory store.
    pub fn in_memory() -> Result<Self> {
        let backend = Arc::new(MemoryBackend::new()) as Arc<dyn StorageBackend>;
        Self::open(backend, StoreConfig::default())
    }

    /// Write the manifest on first open, verify it afterwards.
    fn check_manifest(backend: &dyn StorageBackend) -> Result<()> {
        match backend.get(MANIFEST_KEY)? {
            None => {
                let mut manifest = Vec::with_capacity(5);
                manifest.extend_from_slice(STORE_MAGIC);
                manifest.push(STORE_VERSION);
                backend.put(MANIFEST_KEY, &manifest)?;
                info!("initialized new store");
                Ok(())
            }
            Some(manifest) => {
                if manifest.len() < 5 || &manifest[0..4] != STORE_MAGIC {
                    return Err(StoreError::InvalidFormat("invalid store manifest".into()));
                }
                if manifest[4] != STORE_VERSION {
                    return Err(StoreError::InvalidFormat(format!(
                        "unsupported store version: {}",
                        manifest[4]
                    )));
                }
                Ok(())
            }
        }
    }

    // --- Chunk Operations ---

    /// Store one content chunk.
    pub fn put_chunk(&self, content: &[u8]) -> Result<ChunkId> {
        self.chunks.put(content)
    }

    /// Read one content chunk.
    pub fn get_chunk(&self, id: &ChunkId) -> Result<Vec<u8>> {
        self.chunks.get(id)
    }

    /// Check if a chunk exists.
    pub fn chunk_exists(&self, id: &ChunkId) -> Result<bool> {
        self.chunks.exists(id)
    }

    /// Split file content into chunks and store them, returning a file entry
    /// for the given path.
    pub fn store_file(&self, path: impl Into<String>, content: &[u8]) -> Result<File> {
        let mut chunk_ids = Vec::new();
        for piece in content.chunks(self.config.file_chunk_bytes.max(1)) {
            chunk_ids.push(self.chunks.put(piece)?);
        }
        Ok(File::new(path, chunk_ids, content.len() as u64))
    }

    /// Reassemble a file's content from its chunk list.
    pub fn read_file(&self, file: &File) -> Result<Vec<u8>> {
        let mut content = Vec::with_capacity(file.size as usize);
        for id in &file.chunks {
            content.extend_from_slice(&self.chunks.get(id)?);
        }
        Ok(content)
    }

    // --- Commit Path ---

    /// Commit a tree snapshot to a branch.
    ///
    /// With `base = Some(c)` the branch must currently point at `c`; if
    /// another committer advanced it first, this fails with the retryable
    /// `Conflict` and nothing becomes visible. With `base = None` the branch
    /// is created at the new checkpoint (the root of a fresh history line).
    ///
    /// Every chunk referenced by `tree` must already be stored; the commit
    /// verifies this before anything durable happens, so a failed commit
    /// leaves branches and previously readable trees untouched.
    pub fn commit(
        &self,
        branch: &str,
        base: Option<CheckpointId>,
        tree: &Tree,
    ) -> Result<CheckpointId> {
        for id in tree.chunk_ids() {
            if !self.chunks.exists(id)? {
                return Err(StoreError::ChunkNotFound(*id));
            }
        }

        let tree_chunks = self.codec.encode(tree)?;
        let parents: Vec<CheckpointId> = base.into_iter().collect();
        let checkpoint = self.checkpoints.append(&parents, &tree_chunks)?;

        self.branches.advance(branch, base.as_ref(), checkpoint)?;

        debug!(branch, checkpoint = %checkpoint, files = tree.len(), "committed");
        self.events.publish(StoreEvent::CheckpointCommitted {
            id: checkpoint,
            branch: branch.to_string(),
            tree_chunks,
        });
        self.events.publish(StoreEvent::BranchAdvanced {
            name: branch.to_string(),
            old: base,
            new: checkpoint,
        });

        Ok(checkpoint)
    }

    /// Read the tree snapshot a checkpoint captures.
    pub fn read_tree(&self, checkpoint: CheckpointId) -> Result<Tree> {
        let record = self.checkpoints.read(&checkpoint)?;
        self.codec.decode(&record.tree_chunks)
    }

    /// Read a checkpoint record (parents, tree chunks, creation time).
    pub fn read_checkpoint(&self, checkpoint: CheckpointId) -> Result<CheckpointRecord> {
        self.checkpoints.read(&checkpoint)
    }

    /// Walk history from a checkpoint toward the root, following first
    /// parents, newest first. Stops after `limit` records.
    pub fn history(&self, from: CheckpointId, limit: usize) -> Result<Vec<CheckpointRecord>> {
        let mut records = Vec::new();
        let mut next = Some(from);

        while let Some(id) = next {
            if records.len() >= limit {
                break;
            }
            let record = self.checkpoints.read(&id)?;
            next = record.parents.first().copied();
            records.push(record);
        }

        Ok(records)
    }

    // --- Branch Operations ---

    /// Current head of a branch.
    pub fn head(&self, branch: &str) -> Result<CheckpointId> {
        self.branches.head(branch)
    }

    /// Create a branch at an existing checkpoint.
    pub fn create_branch(&self, name: &str, checkpoint: CheckpointId) -> Result<Branch> {
        let branch = self.branches.create(name, checkpoint)?;
        self.events.publish(StoreEvent::BranchCreated {
            name: branch.name.clone(),
            head: branch.head,
        });
        Ok(branch)
    }

    /// Fork a branch from another branch's current head.
    pub fn fork(&self, new_name: &str, source: &str) -> Result<Branch> {
        let branch = self.branches.fork(new_name, source)?;
        self.events.publish(StoreEvent::BranchCreated {
            name: branch.name.clone(),
            head: branch.head,
        });
        Ok(branch)
    }

    /// Delete a branch name. Underlying data stays until GC finds it
    /// unreachable.
    pub fn delete_branch(&self, name: &str) -> Result<()> {
        self.branches.delete(name)?;
        self.events.publish(StoreEvent::BranchDeleted {
            name: name.to_string(),
        });
        Ok(())
    }

    /// All branches, sorted by name.
    pub fn list_branches(&self) -> Result<Vec<Branch>> {
        self.branches.list()
    }

    // --- Pins ---

    /// Pin a checkpoint so GC never collects it, even when unreachable from
    /// any branch.
    pub fn pin(&self, checkpoint: CheckpointId) -> Result<()> {
        if !self.checkpoints.exists(&checkpoint)? {
            return Err(StoreError::CheckpointNotFound(checkpoint));
        }
        self.update_pins(|pins| {
            pins.pinned.insert(checkpoint);
        })
    }

    /// Remove a pin.
    pub fn unpin(&self, checkpoint: CheckpointId) -> Result<()> {
        self.update_pins(|pins| {
            pins.pinned.remove(&checkpoint);
        })
    }

    /// Currently pinned checkpoints.
    pub fn pinned(&self) -> Result<Vec<CheckpointId>> {
        Ok(self.load_pins()?.pinned.into_iter().collect())
    }

    fn load_pins(&self) -> Result<PinSet> {
        match self.backend.get(PINS_KEY)? {
            Some(raw) => Ok(rmp_serde::from_slice(&raw)?),
            None => Ok(PinSet::default()),
        }
    }

    /// Read-modify-write the pin set through the backend's conditional
    /// write, so concurrent pinners cannot lose updates.
    fn update_pins(&self, mutate: impl Fn(&mut PinSet)) -> Result<()> {
        loop {
            let current_raw = self.backend.get(PINS_KEY)?;
            let mut pins: PinSet = match &current_raw {
                Some(raw) => rmp_serde::from_slice(raw)?,
                None => PinSet::default(),
            };
            mutate(&mut pins);
            let new_raw = rmp_serde::to_vec(&pins)?;

            if self
                .backend
                .compare_and_swap(PINS_KEY, current_raw.as_deref(), &new_raw)?
            {
                return Ok(());
            }
        }
    }

    // --- Garbage Collection ---

    /// Run a mark-and-sweep cycle.
    ///
    /// Roots are all branch heads, the persisted pin set, and `extra_pins`.
    pub fn run_gc(&self, extra_pins: &[CheckpointId]) -> Result<GcResult> {
        let mut pins: Vec<CheckpointId> = self.load_pins()?.pinned.into_iter().collect();
        pins.extend_from_slice(extra_pins);

        let result = self.gc.run(&pins)?;
        self.events.publish(StoreEvent::GcCompleted {
            swept_chunks: result.swept_chunks,
            swept_checkpoints: result.swept_checkpoints,
        });
        Ok(result)
    }

    // --- Introspection ---

    /// Subscribe to store events.
    pub fn subscribe(&self) -> SubscriptionHandle {
        self.events.subscribe()
    }

    /// Store statistics.
    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            chunk_count: self.chunks.chunk_count()?,
            chunk_bytes: self.chunks.total_bytes()?,
            checkpoint_count: self.checkpoints.checkpoint_count()?,
            branch_count: self.branches.branch_count()?,
        })
    }

    /// The store's configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_created_and_verified() {
        let backend = Arc::new(MemoryBackend::new()) as Arc<dyn StorageBackend>;
        {
            let _store = Store::open(Arc::clone(&backend), StoreConfig::default()).unwrap();
        }
        assert!(backend.get(MANIFEST_KEY).unwrap().is_some());

        // Re-open over the same backend succeeds.
        let _store = Store::open(Arc::clone(&backend), StoreConfig::default()).unwrap();

        // A corrupted manifest is refused.
        backend.put(MANIFEST_KEY, b"XXXX\x01").unwrap();
        assert!(matches!(
            Store::open(backend, StoreConfig::default()),
            Err(StoreError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_store_file_splits_content() {
        let store = Store::open(
            Arc::new(MemoryBackend::new()) as Arc<dyn StorageBackend>,
            StoreConfig {
                file_chunk_bytes: 4,
                ..Default::default()
            },
        )
        .unwrap();

        let content = b"0123456789";
        let file = store.store_file("/big.bin", content).unwrap();
        assert_eq!(file.chunks.len(), 3);
        assert_eq!(file.size, 10);
        assert_eq!(store.read_file(&file).unwrap(), content);
    }

    #[test]
    fn test_store_file_deduplicates() {
        let store = Store::in_memory().unwrap();

        let a = store.store_file("/a", b"shared content").unwrap();
        let b = store.store_file("/b", b"shared content").unwrap();
        assert_eq!(a.chunks, b.chunks);
    }

    #[test]
    fn test_pin_unpin_persisted() {
        let backend = Arc::new(MemoryBackend::new()) as Arc<dyn StorageBackend>;
        let store = Store::open(Arc::clone(&backend), StoreConfig::default()).unwrap();

        let file = store.store_file("/f", b"x").unwrap();
        let mut tree = Tree::new();
        tree.push(file);
        let ckpt = store.commit("main", None, &tree).unwrap();

        store.pin(ckpt).unwrap();
        assert_eq!(store.pinned().unwrap(), vec![ckpt]);

        // Pins survive re-opening the store.
        let store = Store::open(backend, StoreConfig::default()).unwrap();
        assert_eq!(store.pinned().unwrap(), vec![ckpt]);

        store.unpin(ckpt).unwrap();
        assert!(store.pinned().unwrap().is_empty());
    }

    #[test]
    fn test_pin_unknown_checkpoint() {
        let store = Store::in_memory().unwrap();
        let ghost = CheckpointId::from_bytes(b"ghost");
        assert!(matches!(
            store.pin(ghost),
            Err(StoreError::CheckpointNotFound(_))
        ));
    }
}
