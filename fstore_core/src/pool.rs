use std::ops::Range;

use rayon::prelude::*;

use crate::error::{FstError, Result};

/// Requested degree of parallelism for one read or write call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parallelism {
    threads: usize,
}

impl Default for Parallelism {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self { threads }
    }
}

impl Parallelism {
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
        }
    }

    pub fn sequential() -> Self {
        Self { threads: 1 }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Build the worker pool for a call that has `jobs` independent units of
    /// work. The pool lives only as long as the call that created it.
    pub fn pool(&self, jobs: usize) -> Result<WorkerPool> {
        let threads = self.threads.min(jobs);
        if threads <= 1 {
            return Ok(WorkerPool { pool: None });
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("fstore-worker-{i}"))
            .build()
            .map_err(|e| FstError::Io(std::io::Error::other(e)))?;
        Ok(WorkerPool { pool: Some(pool) })
    }
}

/// Fork-join pool for a single column read or write.
pub struct WorkerPool {
    pool: Option<rayon::ThreadPool>,
}

impl WorkerPool {
    pub fn is_parallel(&self) -> bool {
        self.pool.is_some()
    }

    /// Run `f` for every job in `range` and return the results in job order,
    /// whatever order the workers finished in.
    pub fn map_ordered<T, F>(&self, range: Range<usize>, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> Result<T> + Send + Sync,
    {
        match &self.pool {
            Some(pool) => pool.install(|| range.into_par_iter().map(&f).collect()),
            None => range.map(f).collect(),
        }
    }

    /// Consume `items` on the workers. Items typically carry disjoint
    /// `&mut` slices of one output buffer.
    pub fn for_each<T, F>(&self, items: Vec<T>, f: F) -> Result<()>
    where
        T: Send,
        F: Fn(T) -> Result<()> + Send + Sync,
    {
        match &self.pool {
            Some(pool) => pool.install(|| items.into_par_iter().try_for_each(&f)),
            None => items.into_iter().try_for_each(f),
        }
    }
}
