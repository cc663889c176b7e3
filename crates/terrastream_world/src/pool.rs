//! # Worker Pool
//!
//! A fixed set of threads draining one `crossbeam-channel` job queue.
//! Loader and generator share the pool; the simulation thread only ever
//! enqueues.
//!
//! ```text
//!   execute(job) ──> [ unbounded channel ] ──> worker 0
//!                                          ──> worker 1
//!                                          ──> worker N-1
//! ```
//!
//! Closing drops the sender; workers finish the queued jobs and exit.
//! Jobs enqueued after closing are dropped on the caller's thread, which
//! fails any `Completion` they carry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use terrastream::StoreResult;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size thread pool.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    executed: Arc<AtomicU64>,
}

impl WorkerPool {
    /// Spawns `threads` workers (at least one).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`](terrastream::StoreError::Io) if a thread
    /// cannot be spawned.
    pub fn new(threads: usize) -> StoreResult<Self> {
        let (sender, receiver) = unbounded::<Job>();
        let executed = Arc::new(AtomicU64::new(0));
        let mut workers = Vec::with_capacity(threads.max(1));
        for i in 0..threads.max(1) {
            let receiver = receiver.clone();
            let executed = Arc::clone(&executed);
            let handle = thread::Builder::new()
                .name(format!("terrastream-worker-{i}"))
                .spawn(move || {
                    for job in receiver.iter() {
                        job();
                        executed.fetch_add(1, Ordering::Relaxed);
                    }
                })?;
            workers.push(handle);
        }
        tracing::info!("worker pool started with {} threads", workers.len());
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            executed,
        })
    }

    /// Queues a job.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        let rejected = {
            let sender = self.sender.lock();
            match sender.as_ref() {
                Some(tx) => tx.send(Box::new(job)).err().map(|e| e.into_inner()),
                None => Some(Box::new(job) as Job),
            }
        };
        // Dropped outside the lock: the job may re-enter `execute`.
        if let Some(job) = rejected {
            tracing::warn!("worker pool closed, job dropped");
            drop(job);
        }
    }

    /// Jobs finished so far.
    #[must_use]
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    /// Number of worker threads still attached.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.workers.lock().len()
    }

    /// Stops accepting jobs, lets the queue drain and joins every worker.
    pub fn close(&self) {
        drop(self.sender.lock().take());
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let current = thread::current().id();
        for handle in workers {
            // The last owner may be a job running on a worker.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_pool_runs_every_job() {
        let pool = WorkerPool::new(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        pool.close();
        assert_eq!(counter.load(Ordering::Relaxed), 100);
        assert_eq!(pool.executed(), 100);
        assert_eq!(pool.threads(), 0);
    }

    #[test]
    fn test_jobs_after_close_are_dropped() {
        let pool = WorkerPool::new(1).unwrap();
        pool.close();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        pool.execute(move || {
            r.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(ran.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_zero_threads_still_spawns_one() {
        let pool = WorkerPool::new(0).unwrap();
        assert_eq!(pool.threads(), 1);
    }
}
