use std::panic::{catch_unwind, AssertUnwindSafe};

use rayon::prelude::*;

use crate::error::SimulationError;

/**
 * Fixed-size worker pool running synchronous task groups.
 *
 * `sync_group_mut1` splits the output slots into batches of
 * `batch_size`, runs one task per slot and returns only after every task
 * of the group has finished. A task writes its own slot and nothing else.
 */
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    pub fn new(num_workers: usize) -> Result<WorkerPool, SimulationError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .thread_name(|i| format!("sph-worker-{}", i))
            .build()?;
        Ok(WorkerPool { pool })
    }

    pub fn num_workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn sync_group_mut1<T1: Send, F: Fn(usize, &mut T1) + Send + Sync>(
        &self,
        pass: &'static str,
        batch_size: usize,
        arr1: &mut [T1],
        f: F,
    ) -> Result<(), SimulationError> {
        let batch_size = batch_size.max(1);
        self.run_group(pass, || {
            arr1.par_chunks_mut(batch_size)
                .enumerate()
                .for_each(|(batch_idx, batch)| {
                    let first = batch_idx * batch_size;
                    for (offset, v1) in batch.iter_mut().enumerate() {
                        f(first + offset, v1);
                    }
                });
        })
    }

    /// Blocks until `group` has completed on the pool; a panicking task fails the whole group.
    fn run_group(&self, pass: &'static str, group: impl FnOnce() + Send) -> Result<(), SimulationError> {
        catch_unwind(AssertUnwindSafe(|| self.pool.install(group))).map_err(|payload| {
            let message = if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_string()
            };
            SimulationError::TaskPanicked { pass, message }
        })
    }
}

pub fn available_parallelism() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}
