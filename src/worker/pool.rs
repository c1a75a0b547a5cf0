use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::errors::WorkerPoolError;

/// A unit of evaluation work. Jobs on one lane run to completion one at
/// a time, in submission order.
pub type Job = BoxFuture<'static, ()>;

/// A striped worker pool: a fixed number of lanes, each with its own
/// bounded queue and worker task. Work is dispatched to a lane by
/// hashing its key, so work sharing a key is strictly serialized while
/// unrelated work proceeds in parallel.
///
/// A full lane queue is reported as an error rather than blocking the
/// submitter; callers retry on their own schedule.
pub struct WorkerPool {
    lane_count: usize,
    lanes: Mutex<Vec<mpsc::Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    queued: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Panics when `workers` or `queue_capacity` is zero; a pool without
    /// lanes or queue slots cannot accept work.
    pub fn new(
        workers: usize,
        queue_capacity: usize,
    ) -> Self {
        assert!(workers > 0, "worker pool requires at least one lane");
        assert!(queue_capacity > 0, "worker pool requires queue capacity");

        let queued = Arc::new(AtomicUsize::new(0));
        let mut lanes = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for lane in 0..workers {
            let (tx, rx) = mpsc::channel::<Job>(queue_capacity);
            lanes.push(tx);
            handles.push(tokio::spawn(lane_loop(lane, rx, Arc::clone(&queued))));
        }

        WorkerPool {
            lane_count: workers,
            lanes: Mutex::new(lanes),
            handles: Mutex::new(handles),
            queued,
        }
    }

    /// Submits a job keyed so that all work for the same key lands on the
    /// same lane. Returns [`WorkerPoolError::QueueFull`] when the lane's
    /// queue has no room, [`WorkerPoolError::Stopped`] after [`stop`].
    ///
    /// [`stop`]: WorkerPool::stop
    pub fn submit_with_key(
        &self,
        key: &str,
        job: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), WorkerPoolError> {
        let lane = self.lane_for(key);
        let sender = {
            let lanes = self.lanes.lock();
            match lanes.get(lane) {
                Some(sender) => sender.clone(),
                None => return Err(WorkerPoolError::Stopped),
            }
        };

        match sender.try_send(job.boxed()) {
            Ok(()) => {
                self.queued.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(WorkerPoolError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(WorkerPoolError::Stopped),
        }
    }

    /// Number of jobs accepted but not yet finished.
    pub fn queue_size(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Closes every lane, drains already-queued jobs, and waits for the
    /// lane tasks to exit. Subsequent submissions are rejected.
    pub async fn stop(&self) -> Result<(), WorkerPoolError> {
        self.lanes.lock().clear();

        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            handle.await.map_err(WorkerPoolError::LaneFailed)?;
        }
        debug!("worker pool stopped");
        Ok(())
    }

    fn lane_for(
        &self,
        key: &str,
    ) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.lane_count
    }
}

async fn lane_loop(
    lane: usize,
    mut rx: mpsc::Receiver<Job>,
    queued: Arc<AtomicUsize>,
) {
    debug!(lane, "worker lane started");
    while let Some(job) = rx.recv().await {
        job.await;
        queued.fetch_sub(1, Ordering::SeqCst);
    }
    debug!(lane, "worker lane stopped");
}
