//! Mark-and-sweep collector implementation.

use crate::branches::BranchManager;
use crate::checkpoints::CheckpointLog;
use crate::chunks::ChunkStore;
use crate::error::Result;
use crate::tree::TreeCodec;
use crate::types::{CheckpointId, ChunkId, Timestamp};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of one garbage collection run.
#[derive(Clone, Debug, Default)]
pub struct GcResult {
    /// Checkpoints reachable at mark time.
    pub reachable_checkpoints: usize,
    /// Chunks reachable at mark time.
    pub reachable_chunks: usize,
    /// Checkpoint records deleted by the sweep.
    pub swept_checkpoints: usize,
    /// Chunks deleted by the sweep.
    pub swept_chunks: usize,
    /// Objects created at or after this instant were left alone.
    pub cutoff: Timestamp,
}

/// Reachability sweep over chunks and checkpoints.
pub struct GarbageCollector {
    chunks: Arc<ChunkStore>,
    codec: Arc<TreeCodec>,
    checkpoints: Arc<CheckpointLog>,
    branches: Arc<BranchManager>,
}

impl GarbageCollector {
    /// Create a collector over the store's components.
    pub fn new(
        chunks: Arc<ChunkStore>,
        codec: Arc<TreeCodec>,
        checkpoints: Arc<CheckpointLog>,
        branches: Arc<BranchManager>,
    ) -> Self {
        Self {
            chunks,
            codec,
            checkpoints,
            branches,
        }
    }

    /// Run one full mark-and-sweep cycle.
    ///
    /// `pins` are checkpoint ids kept alive in addition to the branch heads.
    /// Safe to run concurrently with commits: anything written after the
    /// cutoff survives, and a commit's final ref CAS only ever publishes
    /// post-cutoff data. A partially failed sweep can simply be re-run.
    pub fn run(&self, pins: &[CheckpointId]) -> Result<GcResult> {
        let cutoff = Timestamp::now();

        // Phase 1: mark. Snapshot the root set, then walk history.
        let mut roots: Vec<CheckpointId> = pins.to_vec();
        for branch in self.branches.list()? {
            roots.push(branch.head);
        }

        let (live_checkpoints, live_chunks) = self.mark(&roots)?;
        info!(
            roots = roots.len(),
            checkpoints = live_checkpoints.len(),
            chunks = live_chunks.len(),
            "gc mark complete"
        );

        // Phase 2: sweep everything unreachable and older than the cutoff.
        let mut result = GcResult {
            reachable_checkpoints: live_checkpoints.len(),
            reachable_chunks: live_chunks.len(),
            cutoff,
            ..Default::default()
        };

        for (id, info) in self.checkpoints.list()? {
            if live_checkpoints.contains(&id) || info.created >= cutoff {
                continue;
            }
            if self.checkpoints.remove(&id)? {
                debug!(checkpoint = %id, "swept checkpoint");
                result.swept_checkpoints += 1;
            }
        }

        self.chunks.begin_sweep();
        let sweep = (|| -> Result<usize> {
            let mut swept = 0;
            for (id, info) in self.chunks.list()? {
                if live_chunks.contains(&id) || info.created >= cutoff {
                    continue;
                }
                if self.chunks.delete(&id)? {
                    swept += 1;
                }
            }
            Ok(swept)
        })();
        self.chunks.end_sweep();
        result.swept_chunks = sweep?;

        info!(
            swept_checkpoints = result.swept_checkpoints,
            swept_chunks = result.swept_chunks,
            "gc sweep complete"
        );
        Ok(result)
    }

    /// Walk the transitive closure of the root set.
    ///
    /// Follows parent edges between checkpoints, and from each checkpoint
    /// its tree chunks plus every file chunk the decoded tree references.
    fn mark(&self, roots: &[CheckpointId]) -> Result<(HashSet<CheckpointId>, HashSet<ChunkId>)> {
        let mut live_checkpoints = HashSet::new();
        let mut live_chunks = HashSet::new();
        let mut queue: Vec<CheckpointId> = roots.to_vec();

        while let Some(id) = queue.pop() {
            if !live_checkpoints.insert(id) {
                continue;
            }

            let record = self.checkpoints.read(&id)?;
            queue.extend(record.parents.iter().copied());

            live_chunks.extend(record.tree_chunks.iter().copied());
            let tree = self.codec.decode(&record.tree_chunks)?;
            live_chunks.extend(tree.chunk_ids().copied());
        }

        Ok((live_checkpoints, live_chunks))
    }
}
