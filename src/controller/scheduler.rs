use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::dag::Node;
use crate::dag::NodeId;

use super::AnyNode;

/// Keeps exactly one running task per desired runnable node.
///
/// `synchronize` diffs the desired set against the running set: stale
/// tasks are cancelled and awaited, new ones spawned. A task that exits
/// on its own (crash or clean return) removes itself; it is restarted
/// only by a later synchronize that still wants its node.
pub struct Scheduler {
    root: CancellationToken,
    tasks: Arc<DashMap<NodeId, RunningTask>>,
    next_task_id: AtomicU64,
}

struct RunningTask {
    task_id: u64,
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            root: CancellationToken::new(),
            tasks: Arc::new(DashMap::new()),
            next_task_id: AtomicU64::new(0),
        }
    }

    /// Reconciles running tasks against the desired set. Idempotent:
    /// synchronizing twice with the same set changes nothing.
    pub async fn synchronize(
        &self,
        runnables: Vec<AnyNode>,
    ) {
        let desired: HashMap<NodeId, AnyNode> = runnables
            .into_iter()
            .filter(AnyNode::is_runnable)
            .map(|node| (node.node_id().clone(), node))
            .collect();

        // Cancel tasks whose nodes are gone, then wait for all of them
        // together.
        let stale: Vec<NodeId> = self
            .tasks
            .iter()
            .filter(|entry| !desired.contains_key(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut stopping = Vec::new();
        for id in stale {
            if let Some((_, task)) = self.tasks.remove(&id) {
                debug!(node_id = %id, "stopping node task");
                task.token.cancel();
                if let Some(handle) = task.handle.lock().take() {
                    stopping.push(handle);
                }
            }
        }
        for result in join_all(stopping).await {
            if let Err(err) = result {
                warn!(%err, "node task panicked during shutdown");
            }
        }

        for (id, node) in desired {
            if self.tasks.contains_key(&id) {
                continue;
            }
            self.spawn(id, node);
        }
    }

    fn spawn(
        &self,
        id: NodeId,
        node: AnyNode,
    ) {
        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();

        // The entry is inserted before spawning so a task that exits
        // instantly still finds itself in the map and removes only its
        // own generation.
        self.tasks.insert(
            id.clone(),
            RunningTask {
                task_id,
                token: token.clone(),
                handle: Mutex::new(None),
            },
        );

        let tasks = Arc::clone(&self.tasks);
        let task_node = node;
        let task_id_for_removal = task_id;
        let run_id = id.clone();
        let handle = tokio::spawn(async move {
            debug!(node_id = %run_id, "node task started");
            match task_node.run(token).await {
                Ok(()) => debug!(node_id = %run_id, "node task finished"),
                Err(err) => warn!(node_id = %run_id, %err, "node task exited with error"),
            }
            tasks.remove_if(&run_id, |_, task| task.task_id == task_id_for_removal);
        });

        if let Some(entry) = self.tasks.get(&id) {
            if entry.task_id == task_id {
                *entry.handle.lock() = Some(handle);
            }
        }
    }

    /// IDs of nodes with a live task entry.
    pub fn running_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.tasks.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Cancels everything and waits for all tasks to stop.
    pub async fn close(&self) {
        self.root.cancel();

        let ids: Vec<NodeId> = self.tasks.iter().map(|entry| entry.key().clone()).collect();
        let mut stopping = Vec::new();
        for id in ids {
            if let Some((_, task)) = self.tasks.remove(&id) {
                if let Some(handle) = task.handle.lock().take() {
                    stopping.push(handle);
                }
            }
        }
        for result in join_all(stopping).await {
            if let Err(err) = result {
                warn!(%err, "node task panicked during shutdown");
            }
        }
        debug!("scheduler closed");
    }
}
