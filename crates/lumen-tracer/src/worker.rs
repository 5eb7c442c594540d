//! Persistent-kernel worker pool
//!
//! The shading stage runs as a fixed set of workers that repeatedly claim
//! the next unprocessed batch of path indices by advancing a shared atomic
//! cursor, the CPU rendition of a persistent GPU kernel. Claiming batches
//! rather than whole stripes oversubscribes the workers relative to the
//! work list, so a worker stuck on expensive paths (full material
//! evaluation) never leaves cheap paths (immediate misses) stranded behind
//! it. No locks anywhere on the dispatch path.

use std::sync::atomic::{AtomicU32, Ordering};

/// Paths claimed per cursor advance. Small enough that divergent per-path
/// cost balances out, large enough that the cursor is not contended.
const CLAIM_BATCH: u32 = 64;

/// Fixed-size pool sized to hardware parallelism
pub struct WorkerPool {
    threads: usize,
}

impl WorkerPool {
    pub fn new() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        log::debug!("worker pool sized to {threads} threads");
        Self { threads }
    }

    /// Pool with an explicit thread count (tests, benchmarks).
    pub fn with_threads(threads: usize) -> Self {
        Self { threads: threads.max(1) }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `kernel` for every index in `0..job_count`.
    ///
    /// Workers claim [`CLAIM_BATCH`]-sized ranges through a shared relaxed
    /// cursor until the cursor passes `job_count`. Returns once every index
    /// has been processed.
    pub fn dispatch<F>(&self, job_count: u32, kernel: F)
    where
        F: Fn(u32) + Sync,
    {
        if job_count == 0 {
            return;
        }
        // a dispatch smaller than one batch is not worth the thread spawn
        if job_count <= CLAIM_BATCH || self.threads == 1 {
            for i in 0..job_count {
                kernel(i);
            }
            return;
        }
        let cursor = AtomicU32::new(0);
        let kernel = &kernel;
        let cursor = &cursor;
        std::thread::scope(|scope| {
            for _ in 0..self.threads {
                scope.spawn(move || loop {
                    let start = cursor.fetch_add(CLAIM_BATCH, Ordering::Relaxed);
                    if start >= job_count {
                        break;
                    }
                    let end = (start + CLAIM_BATCH).min(job_count);
                    for i in start..end {
                        kernel(i);
                    }
                });
            }
        });
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_every_index_once() {
        let pool = WorkerPool::with_threads(4);
        let n = 10_000u32;
        let sum = AtomicU64::new(0);
        pool.dispatch(n, |i| {
            sum.fetch_add(i as u64, Ordering::Relaxed);
        });
        assert_eq!(sum.load(Ordering::Relaxed), (n as u64 - 1) * n as u64 / 2);
    }

    #[test]
    fn test_empty_dispatch() {
        let pool = WorkerPool::with_threads(2);
        pool.dispatch(0, |_| panic!("kernel must not run"));
    }

    #[test]
    fn test_small_dispatch_runs_inline() {
        let pool = WorkerPool::with_threads(8);
        let count = AtomicU64::new(0);
        pool.dispatch(5, |_| {
            count.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(count.load(Ordering::Relaxed), 5);
    }
}
