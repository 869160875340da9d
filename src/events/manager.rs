//! Event manager implementation.

use crate::types::{CheckpointId, ChunkId};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default buffered events per subscriber.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Why a subscription stopped receiving events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// The subscriber called unsubscribe.
    Unsubscribed,
    /// The subscriber fell too far behind and its buffer filled up.
    BufferOverflow,
}

/// Events emitted by the store.
#[derive(Clone, Debug)]
pub enum StoreEvent {
    /// A new checkpoint was appended.
    CheckpointCommitted {
        id: CheckpointId,
        branch: String,
        tree_chunks: Vec<ChunkId>,
    },
    /// A branch was created or forked.
    BranchCreated { name: String, head: CheckpointId },
    /// A branch head moved.
    BranchAdvanced {
        name: String,
        old: Option<CheckpointId>,
        new: CheckpointId,
    },
    /// A branch name was removed.
    BranchDeleted { name: String },
    /// A garbage collection cycle finished.
    GcCompleted {
        swept_chunks: usize,
        swept_checkpoints: usize,
    },
    /// This subscription is over.
    Dropped { reason: DropReason },
}

/// Handle for receiving events.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub receiver: Receiver<StoreEvent>,
}

impl SubscriptionHandle {
    /// Block until the next event.
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with a timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

struct Subscription {
    sender: Sender<StoreEvent>,
}

impl Subscription {
    /// Try to send an event. Returns false if the buffer is full or closed.
    fn try_send(&self, event: StoreEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }
}

/// Broadcasts store events to subscribers.
pub struct EventManager {
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    next_id: AtomicU64,
}

impl EventManager {
    /// Create an event manager with no subscribers.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe with the default buffer size.
    pub fn subscribe(&self) -> SubscriptionHandle {
        self.subscribe_with_buffer(DEFAULT_BUFFER_SIZE)
    }

    /// Subscribe with a custom buffer size.
    pub fn subscribe_with_buffer(&self, buffer_size: usize) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(buffer_size.max(1));

        self.subscriptions
            .write()
            .insert(id, Subscription { sender });

        SubscriptionHandle { id, receiver }
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(sub) = self.subscriptions.write().remove(&id) {
            let _ = sub.try_send(StoreEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Broadcast an event to every subscriber, dropping any whose buffer is
    /// full.
    pub fn publish(&self, event: StoreEvent) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            if subs.is_empty() {
                return;
            }
            for (id, sub) in subs.iter() {
                if !sub.try_send(event.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    let _ = sub.try_send(StoreEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn advanced(n: u64) -> StoreEvent {
        StoreEvent::BranchAdvanced {
            name: "main".to_string(),
            old: None,
            new: CheckpointId::from_bytes(&n.to_le_bytes()),
        }
    }

    #[test]
    fn test_subscribe_receive_unsubscribe() {
        let manager = EventManager::new();
        let handle = manager.subscribe();
        assert_eq!(manager.subscription_count(), 1);

        manager.publish(advanced(1));
        let event = handle.recv_timeout(Duration::from_millis(100)).unwrap();
        assert!(matches!(event, StoreEvent::BranchAdvanced { .. }));

        manager.unsubscribe(handle.id);
        assert_eq!(manager.subscription_count(), 0);

        let event = handle.recv_timeout(Duration::from_millis(100)).unwrap();
        assert!(matches!(
            event,
            StoreEvent::Dropped {
                reason: DropReason::Unsubscribed
            }
        ));
    }

    #[test]
    fn test_slow_subscriber_dropped() {
        let manager = EventManager::new();
        let handle = manager.subscribe_with_buffer(2);

        for i in 0..10 {
            manager.publish(advanced(i));
        }

        assert_eq!(manager.subscription_count(), 0);

        // The first two events are still in the buffer, drain them.
        assert!(handle.try_recv().is_ok());
        assert!(handle.try_recv().is_ok());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let manager = EventManager::new();
        manager.publish(advanced(1));
        assert_eq!(manager.subscription_count(), 0);
    }
}
