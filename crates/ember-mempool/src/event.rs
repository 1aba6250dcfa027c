//! Mempool event stream.
//!
//! The engine publishes every externally observable state change on a
//! broadcast channel, in program order. The surrounding node subscribes to
//! relay transactions, feed the wallet, and surface double-spend warnings.

use tokio::sync::broadcast;

use ember_core::types::Hash256;

use crate::entry::MempoolEntry;

/// Externally observable mempool state changes.
#[derive(Clone, Debug)]
pub enum MempoolEvent {
    /// A transaction passed verification.
    Tx { hash: Hash256 },
    /// An entry was inserted into the pool.
    AddEntry { entry: MempoolEntry },
    /// A transaction was buffered as an orphan.
    AddOrphan { hash: Hash256, peer: i32 },
    /// An entry left the pool because a block confirmed it.
    Confirmed { hash: Hash256, block: Hash256 },
    /// An entry was evicted (capacity, expiry, conflict, or reorg).
    RemoveEntry { entry: MempoolEntry },
    /// An orphan was dropped without being resolved.
    RemoveOrphan { hash: Hash256 },
    /// An in-pool spender conflicted with a confirmed transaction and was
    /// evicted.
    DoubleSpend { hash: Hash256 },
    /// An incoming transaction was rejected for double-spending the pool.
    Conflict { hash: Hash256 },
    /// A resolved orphan failed verification.
    BadOrphan { hash: Hash256, peer: i32 },
    /// A disconnected block's transaction re-entered the pool.
    Unconfirmed { hash: Hash256 },
    /// A per-transaction failure inside a batch operation.
    Error { hash: Hash256, reason: String },
}

/// Broadcast fan-out for [`MempoolEvent`]s. Sends never block; events are
/// dropped when no subscriber is attached.
#[derive(Debug)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<MempoolEvent>,
}

const EVENT_CAPACITY: usize = 1024;

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MempoolEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: MempoolEvent) {
        // A send error only means nobody is listening.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(MempoolEvent::Tx { hash: Hash256::ZERO });
    }

    #[test]
    fn subscribers_see_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(MempoolEvent::Tx { hash: Hash256([1; 32]) });
        bus.emit(MempoolEvent::RemoveOrphan { hash: Hash256([2; 32]) });

        assert!(matches!(rx.try_recv().unwrap(), MempoolEvent::Tx { hash } if hash == Hash256([1; 32])));
        assert!(matches!(rx.try_recv().unwrap(), MempoolEvent::RemoveOrphan { hash } if hash == Hash256([2; 32])));
        assert!(rx.try_recv().is_err());
    }
}
