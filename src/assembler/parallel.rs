//! Threaded element loop.
//!
//! Workers claim chunks of element indices from a shared atomic cursor, so
//! expensive elements do not stall a static partition. Element contributions
//! are computed in the worker's own workspace and merged into the shared
//! target under one lock. With a single thread the loop runs inline in
//! element order.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use rayon::ThreadPool;

use crate::assembler::options::AssemblerOptions;
use crate::assembler::workspace::{ElementWorkspace, WorkspacePool};
use crate::mesh_error::AssemblerError;

/// Thread pool and chunking of the element loop.
#[derive(Debug)]
pub struct ElementLoop {
    num_threads: usize,
    chunk_size: usize,
    pool: Option<ThreadPool>,
}

impl ElementLoop {
    pub fn new(opts: &AssemblerOptions) -> Result<Self, AssemblerError> {
        opts.validate()?;
        let pool = if opts.num_threads > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(opts.num_threads)
                .thread_name(|i| format!("assembler-{i}"))
                .build()
                .map_err(|e| AssemblerError::InvalidOption(format!("thread pool: {e}")))?;
            Some(pool)
        } else {
            None
        };
        Ok(Self {
            num_threads: opts.num_threads,
            chunk_size: opts.chunk_size,
            pool,
        })
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Run `compute` on every element in `0..num_elements`, then `merge` its
    /// workspace into `target` while holding the target lock.
    ///
    /// The first error stops the loop; elements already merged stay merged.
    pub fn run<T, F, M>(
        &self,
        workspaces: &WorkspacePool,
        num_elements: usize,
        target: &mut T,
        compute: F,
        merge: M,
    ) -> Result<(), AssemblerError>
    where
        T: Send,
        F: Fn(usize, &mut ElementWorkspace) -> Result<(), AssemblerError> + Sync,
        M: Fn(usize, &ElementWorkspace, &mut T) -> Result<(), AssemblerError> + Sync,
    {
        let Some(pool) = self.pool.as_ref() else {
            let mut ws = workspaces.slot(0);
            for e in 0..num_elements {
                compute(e, &mut ws)?;
                merge(e, &ws, target)?;
            }
            return Ok(());
        };

        let cursor = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let first_err: Mutex<Option<AssemblerError>> = Mutex::new(None);
        let target = Mutex::new(target);
        let chunk = self.chunk_size;

        let worker = |t: usize| -> Result<(), AssemblerError> {
            let mut ws = workspaces.slot(t);
            while !stop.load(Ordering::Relaxed) {
                let start = cursor.fetch_add(chunk, Ordering::Relaxed);
                if start >= num_elements {
                    break;
                }
                for e in start..(start + chunk).min(num_elements) {
                    compute(e, &mut ws)?;
                    let mut guard = target.lock();
                    merge(e, &ws, &mut **guard)?;
                }
            }
            Ok(())
        };

        pool.scope(|s| {
            for t in 0..self.num_threads.min(workspaces.len()) {
                let worker = &worker;
                let (stop, first_err) = (&stop, &first_err);
                s.spawn(move |_| {
                    if let Err(e) = worker(t) {
                        stop.store(true, Ordering::Relaxed);
                        first_err.lock().get_or_insert(e);
                    }
                });
            }
        });
        match first_err.into_inner() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
