use std::time::Instant;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::dag::NodeId;

/// A node whose exports changed, waiting for the controller to fan its
/// dependants out for re-evaluation.
#[derive(Debug, Clone)]
pub struct QueuedNode {
    pub node_id: NodeId,
    /// When the most recent enqueue happened; used to observe propagation
    /// latency.
    pub last_updated: Instant,
}

/// Insertion-ordered set of updated nodes with a single-slot wakeup.
///
/// Notifications are level-triggered: rapid repeated enqueues of the same
/// node collapse into one entry carrying the latest timestamp, and the
/// controller drains everything accumulated since its last wakeup in one
/// batch. A wakeup may find an already-drained queue; callers skip empty
/// batches.
#[derive(Default)]
pub struct Queue {
    pending: Mutex<IndexMap<NodeId, Instant>>,
    signal: Notify,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node, keeping its original queue position when it is
    /// already pending, and signals the controller without blocking.
    pub fn enqueue(
        &self,
        node_id: NodeId,
    ) {
        self.pending.lock().insert(node_id, Instant::now());
        self.signal.notify_one();
    }

    /// Atomically drains every pending node in enqueue order.
    pub fn dequeue_all(&self) -> Vec<QueuedNode> {
        let mut pending = self.pending.lock();
        pending
            .drain(..)
            .map(|(node_id, last_updated)| QueuedNode {
                node_id,
                last_updated,
            })
            .collect()
    }

    /// Resolves when at least one enqueue happened since the last wakeup.
    pub async fn changed(&self) {
        self.signal.notified().await;
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
