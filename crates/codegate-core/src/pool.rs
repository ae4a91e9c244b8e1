//! Fixed-size worker pool for validation jobs.
//!
//! Workers pull jobs from a shared bounded queue and run one job at a time.
//! Jobs for the same version id never run concurrently; jobs for different
//! versions do.

use std::collections::HashMap;
use std::sync::Arc;

use codegate_state::VersionId;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::job::{JobError, JobReport, JobRunner, ValidationJob};

/// Default number of workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Default queue capacity per worker.
const QUEUE_PER_WORKER: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    Closed,
}

/// A job together with how it ended.
#[derive(Debug)]
pub struct FinishedJob {
    pub job: ValidationJob,
    pub outcome: Result<JobReport, JobError>,
}

/// Per-version mutexes, dropped once nobody holds them.
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<VersionId, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    async fn acquire(&self, key: VersionId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(key).or_default().clone()
    }

    async fn release(&self, key: VersionId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(lock);
        if locks.get(&key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&key);
        }
    }
}

pub struct WorkerPool {
    sender: mpsc::Sender<ValidationJob>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `size` workers (at least one). Finished jobs are reported on
    /// the returned receiver; dropping it does not stop the pool.
    pub fn spawn(
        runner: Arc<JobRunner>,
        size: usize,
    ) -> (Self, mpsc::UnboundedReceiver<FinishedJob>) {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel(size * QUEUE_PER_WORKER);
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let locks = Arc::new(KeyedLocks::default());

        let workers = (0..size)
            .map(|worker| {
                let runner = runner.clone();
                let receiver = receiver.clone();
                let locks = locks.clone();
                let done_tx = done_tx.clone();
                tokio::spawn(async move {
                    worker_loop(worker, runner, receiver, locks, done_tx).await;
                })
            })
            .collect();

        info!(workers = size, "worker pool started");
        (Self { sender, workers }, done_rx)
    }

    /// Queue a job, waiting for space if the queue is full.
    pub async fn submit(&self, job: ValidationJob) -> Result<(), PoolError> {
        self.sender.send(job).await.map_err(|_| PoolError::Closed)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stop accepting jobs, let workers drain the queue, and wait for them.
    pub async fn close_and_join(self) {
        drop(self.sender);
        for handle in self.workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task failed");
            }
        }
        info!("worker pool stopped");
    }
}

async fn worker_loop(
    worker: usize,
    runner: Arc<JobRunner>,
    receiver: Arc<Mutex<mpsc::Receiver<ValidationJob>>>,
    locks: Arc<KeyedLocks>,
    done: mpsc::UnboundedSender<FinishedJob>,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(job) = next else {
            break;
        };
        debug!(worker, version_id = job.version_id, "picked up job");

        let lock = locks.acquire(job.version_id).await;
        let outcome = {
            let _guard = lock.lock().await;
            runner.run(&job).await
        };
        locks.release(job.version_id, lock).await;

        if let Err(e) = &outcome {
            warn!(worker, version_id = job.version_id, error = %e, "job could not be recorded");
        }
        // Nobody listening is fine.
        let _ = done.send(FinishedJob { job, outcome });
    }
    debug!(worker, "worker exiting");
}
