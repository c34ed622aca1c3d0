// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A worker pool for dispatching batched lookups.
//!
//! Each worker owns its job queue, callers address workers by index and keep
//! per-worker result slabs, so workers never share mutable state with each
//! other. The table itself must stay immutable while lookups are in flight
//! (build first, then query).

use std::sync::mpsc::{channel, Sender};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of workers with per-worker job queues.
///
/// ```
/// use cuckoo_table::WorkerPool;
/// use std::sync::mpsc::channel;
///
/// let pool = WorkerPool::new(2);
/// let (tx, rx) = channel();
///
/// for worker in 0..pool.worker_count() {
///     let tx = tx.clone();
///     pool.queue(worker, move || {
///         tx.send(worker).expect("collector is alive");
///     });
/// }
///
/// pool.drain(0);
/// pool.drain(1);
/// assert_eq!(2, rx.try_iter().count());
///
/// pool.shutdown();
/// ```
pub struct WorkerPool {
    workers: Vec<Worker>,
}

struct Worker {
    sender: Sender<Job>,
    handle: JoinHandle<()>,
}

impl WorkerPool {
    /// Spawns `num_workers` workers, each with its own queue.
    #[must_use]
    pub fn new(num_workers: usize) -> Self {
        let workers = (0..num_workers)
            .map(|index| {
                let (sender, receiver) = channel::<Job>();

                let handle = std::thread::spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                    log::trace!("worker {index} shutting down");
                });

                Worker { sender, handle }
            })
            .collect();

        Self { workers }
    }

    /// Number of workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Enqueues a job on worker `index`. Jobs on one worker run in queue
    /// order; different workers are independent.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn queue<F: FnOnce() + Send + 'static>(&self, index: usize, job: F) {
        self.workers[index]
            .sender
            .send(Box::new(job))
            .expect("worker should be running");
    }

    /// Blocks until worker `index` has completed everything queued before
    /// this call.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn drain(&self, index: usize) {
        let (done, drained) = channel();

        self.queue(index, move || {
            let _ = done.send(());
        });

        let _ = drained.recv();
    }

    /// Stops all workers once their queues run dry and joins them.
    pub fn shutdown(self) {
        let mut handles = Vec::with_capacity(self.workers.len());

        for Worker { sender, handle } in self.workers {
            drop(sender);
            handles.push(handle);
        }

        for handle in handles {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use test_log::test;

    #[test]
    fn jobs_run_on_their_worker() {
        let pool = WorkerPool::new(3);
        let counters: Arc<[AtomicUsize; 3]> = Arc::new(Default::default());

        for round in 0..10 {
            for worker in 0..pool.worker_count() {
                let counters = Arc::clone(&counters);
                pool.queue(worker, move || {
                    counters[worker].fetch_add(round + 1, Ordering::Relaxed);
                });
            }
        }

        for worker in 0..pool.worker_count() {
            pool.drain(worker);
        }

        for counter in counters.iter() {
            assert_eq!(55, counter.load(Ordering::Relaxed));
        }

        pool.shutdown();
    }

    #[test]
    fn drain_waits_for_earlier_jobs() {
        let pool = WorkerPool::new(1);
        let flag = Arc::new(AtomicUsize::new(0));

        {
            let flag = Arc::clone(&flag);
            pool.queue(0, move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                flag.store(1, Ordering::SeqCst);
            });
        }

        pool.drain(0);
        assert_eq!(1, flag.load(Ordering::SeqCst));

        pool.shutdown();
    }

    #[test]
    fn shutdown_finishes_queued_work() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        for worker in 0..2 {
            for _ in 0..100 {
                let counter = Arc::clone(&counter);
                pool.queue(worker, move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                });
            }
        }

        pool.shutdown();
        assert_eq!(200, counter.load(Ordering::Relaxed));
    }
}
