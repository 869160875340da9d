//! Store event broadcast.
//!
//! Subscribers get notified when checkpoints land, branches move, or a GC
//! cycle finishes. Delivery is best-effort over bounded channels: a
//! subscriber that stops draining is dropped rather than ever blocking the
//! commit path.

mod manager;

pub use manager::{
    DropReason, EventManager, StoreEvent, SubscriptionHandle, SubscriptionId,
};
