//! Branch management.
//!
//! A branch is a named, mutable pointer to a checkpoint. All mutation goes
//! through the backend's conditional write, so concurrent committers on one
//! branch serialize without locking: losers get `Conflict` and retry against
//! the new head. Forks share all checkpoints and chunks up to the fork point
//! at zero copy cost.

mod manager;

pub use manager::{Branch, BranchManager, MAIN_BRANCH};
