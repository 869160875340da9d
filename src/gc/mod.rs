//! Garbage collection.
//!
//! Two-phase mark-and-sweep over the chunk store and checkpoint log, rooted
//! at the branch heads and pinned checkpoints. The sweep only touches
//! objects created before the mark cutoff, so a commit racing the collector
//! keeps everything it wrote.

mod collector;

pub use collector::{GarbageCollector, GcResult};
