//! Bounded worker pool with a best-effort completion deadline.
//!
//! Every batch gets its own set of scoped-by-channel worker threads. The
//! caller waits until either all tasks report back or the deadline passes.
//! On timeout the caller proceeds with whatever finished; stragglers keep
//! running in the background and their results are dropped.
//!
//! ```text
//!   caller ──jobs──▶ [ worker 0 | worker 1 | ... ] ──results──▶ caller
//!                                                      (recv_deadline)
//! ```

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError};
use tracing::{debug, warn};

/// Default completion deadline for one batch.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Summary of one batch submitted to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOutcome {
    /// Number of tasks submitted
    pub total: usize,

    /// Number of tasks that reported back before the deadline
    pub completed: usize,

    /// Whether the deadline passed before every task completed
    pub timed_out: bool,
}

impl PoolOutcome {
    /// True when every task completed in time.
    pub fn is_complete(&self) -> bool {
        !self.timed_out && self.completed == self.total
    }
}

/// Fixed-size pool of worker threads.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    num_threads: usize,
    timeout: Duration,
}

impl WorkerPool {
    /// Creates a pool with `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads: num_threads.max(1),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Creates a pool sized to the machine.
    pub fn with_available_parallelism() -> Self {
        let n = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::new(n)
    }

    /// Overrides the completion deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs every task and waits for them, up to the deadline.
    pub fn execute_all<F>(&self, name: &str, tasks: Vec<F>) -> PoolOutcome
    where
        F: FnOnce() + Send + 'static,
    {
        let (_, outcome) = self.map(name, tasks, |task| task());
        outcome
    }

    /// Applies `f` to every item in parallel.
    ///
    /// Results come back in input order. Items that did not finish before
    /// the deadline are `None`.
    pub fn map<T, R, F>(&self, name: &str, items: Vec<T>, f: F) -> (Vec<Option<R>>, PoolOutcome)
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let total = items.len();
        let mut results: Vec<Option<R>> = (0..total).map(|_| None).collect();
        if total == 0 {
            return (
                results,
                PoolOutcome { total, completed: 0, timed_out: false },
            );
        }

        let (job_tx, job_rx) = channel::unbounded::<(usize, T)>();
        let (result_tx, result_rx) = channel::unbounded::<(usize, R)>();
        for job in items.into_iter().enumerate() {
            // Receiver is alive until workers exit, which needs this sender dropped
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let f = Arc::new(f);
        let workers = self.num_threads.min(total);
        let mut spawned = 0;
        for i in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let f = Arc::clone(&f);
            let spawn = thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || {
                    while let Ok((idx, item)) = job_rx.recv() {
                        if result_tx.send((idx, f(item))).is_err() {
                            // Caller gave up waiting
                            break;
                        }
                    }
                });
            match spawn {
                Ok(_) => spawned += 1,
                Err(e) => warn!("{}: failed to spawn worker {}: {}", name, i, e),
            }
        }
        drop(result_tx);

        if spawned == 0 {
            // Degrade to running inline on the caller's thread
            while let Ok((idx, item)) = job_rx.recv() {
                results[idx] = Some(f(item));
            }
            return (
                results,
                PoolOutcome { total, completed: total, timed_out: false },
            );
        }
        drop(job_rx);

        let deadline = Instant::now() + self.timeout;
        let mut completed = 0;
        let mut timed_out = false;
        while completed < total {
            match result_rx.recv_deadline(deadline) {
                Ok((idx, value)) => {
                    results[idx] = Some(value);
                    completed += 1;
                }
                Err(RecvTimeoutError::Timeout) => {
                    timed_out = true;
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if timed_out {
            warn!(
                "{}: {} of {} tasks still running after {:?}, continuing without them",
                name,
                total - completed,
                total,
                self.timeout
            );
        } else {
            debug!("{}: {} tasks completed on {} workers", name, completed, spawned);
        }

        (results, PoolOutcome { total, completed, timed_out })
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::with_available_parallelism()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_map_preserves_order() {
        let pool = WorkerPool::new(4);
        let (results, outcome) = pool.map("square", (0..32).collect(), |x: u64| x * x);
        assert!(outcome.is_complete());
        assert_eq!(outcome.completed, 32);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(*r, Some((i * i) as u64));
        }
    }

    #[test]
    fn test_execute_all_runs_every_task() {
        let counter = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let counter = Arc::clone(&counter);
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .collect();
        let outcome = WorkerPool::new(3).execute_all("count", tasks);
        assert!(outcome.is_complete());
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_empty_batch() {
        let outcome = WorkerPool::new(2).execute_all::<fn()>("empty", Vec::new());
        assert_eq!(outcome.total, 0);
        assert!(outcome.is_complete());
    }

    #[test]
    fn test_timeout_returns_partial_results() {
        let pool = WorkerPool::new(2).with_timeout(Duration::from_millis(100));
        let (results, outcome) = pool.map("slow", vec![0u64, 1], |x| {
            if x == 1 {
                thread::sleep(Duration::from_millis(800));
            }
            x
        });
        assert!(outcome.timed_out);
        assert_eq!(outcome.completed, 1);
        assert_eq!(results[0], Some(0));
        assert_eq!(results[1], None);
    }
}
