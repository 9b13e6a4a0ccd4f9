//! The tasklet executor: a pool of worker threads that dequeue task
//! buffers from a shared-memory task queue, invoke a host-supplied handler,
//! and enqueue the result onto a paired result queue.
//!
//! Grounded on
//! `original_source/src/tee_teleport/posix_proxy/src/xtasklet/cross_tasklet.c`
//! (`XtaskletCreate`/`ExecutorFetch`/`XtaskletDestroy`). The TEE-side task
//! producer (which stamps `id`/waits on `done`/manages `refCnt` in the
//! original `struct Xtask`) lives outside this host-side crate; here only
//! the fixed header prefix needed to parse/emit task buffers is modeled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{QueueError, Result};
use crate::queue::BlockingQueue;
use crate::thread_pool::ThreadPool;

/// Marks a task buffer as well-formed (`XTASKLET_BUF_MAGIC`).
pub const XTASK_BUF_MAGIC: u32 = 0x1234_5678;

const HEADER_LEN: usize = 16; // magic: u32, _pad: u32, id: u64

/// The fixed prefix every task/result buffer carries ahead of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHeader {
    /// Must equal [`XTASK_BUF_MAGIC`] for the buffer to be accepted.
    pub magic: u32,
    /// Correlates a result back to the request that produced it; opaque to
    /// this crate, round-tripped verbatim.
    pub id: u64,
}

impl TaskHeader {
    fn decode(buf: &[u8]) -> Result<(Self, &[u8])> {
        if buf.len() < HEADER_LEN {
            return Err(QueueError::TruncatedTask);
        }
        let magic = u32::from_ne_bytes(buf[0..4].try_into().unwrap());
        if magic != XTASK_BUF_MAGIC {
            return Err(QueueError::BadMagic {
                expected: XTASK_BUF_MAGIC,
                found: magic,
            });
        }
        let id = u64::from_ne_bytes(buf[8..16].try_into().unwrap());
        Ok((TaskHeader { magic, id }, &buf[HEADER_LEN..]))
    }

    fn encode(self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(&self.magic.to_ne_bytes());
        out.extend_from_slice(&0u32.to_ne_bytes());
        out.extend_from_slice(&self.id.to_ne_bytes());
        out.extend_from_slice(payload);
        out
    }
}

/// A handler invoked for each dequeued task: given the task payload
/// (header already stripped), return the payload to enqueue as the result.
/// Mirrors `TaskFn` (`long (*)(uint8_t *membuf, void *priv)`), generalized
/// to return an owned buffer instead of writing through a raw pointer.
pub trait TaskHandler: Send + Sync {
    /// Handle one task payload, producing the bytes to send back as the
    /// matching result payload.
    fn handle(&self, payload: &[u8]) -> Vec<u8>;
}

impl<F> TaskHandler for F
where
    F: Fn(&[u8]) -> Vec<u8> + Send + Sync,
{
    fn handle(&self, payload: &[u8]) -> Vec<u8> {
        self(payload)
    }
}

/// Where the task queue and result queue live: two equally-sized halves of
/// one shared-memory region, matching `XtaskletCreateProps::{shm, shmSz}`.
pub struct XtaskletMemory {
    /// Pointer to the start of the shared region.
    pub shm: *mut u8,
    /// Total size in bytes; split evenly between task and result queues.
    pub shm_size: usize,
}

// SAFETY: see `BlockingQueue`'s Send/Sync rationale; the two halves are
// disjoint and each is owned by exactly one `BlockingQueue` instance.
unsafe impl Send for XtaskletMemory {}
unsafe impl Sync for XtaskletMemory {}

/// A running tasklet: owns the task/result queue pair and the worker pool
/// draining the task queue.
///
/// Grounded on `struct Xtasklet` plus `XtaskletCreate`/`XtaskletDestroy`.
pub struct Xtasklet {
    terminated: Arc<AtomicBool>,
    task_queue: Arc<BlockingQueue>,
    result_queue: Arc<BlockingQueue>,
    pool: Option<ThreadPool>,
}

impl Xtasklet {
    /// Create a tasklet executor over `mem`, splitting it into a task queue
    /// (this side consumes) and a result queue (this side produces), then
    /// spawn `concurrency` worker threads each running `handler` for every
    /// dequeued task (`XtaskletCreate`).
    ///
    /// # Safety
    /// `mem.shm` must be valid for reads and writes across `mem.shm_size`
    /// bytes for as long as the returned `Xtasklet` (and any peer holding
    /// the matching producer-side queues) is alive.
    pub unsafe fn new(
        mem: XtaskletMemory,
        concurrency: usize,
        handler: impl TaskHandler + 'static,
    ) -> Result<Self> {
        let half = mem.shm_size / 2;
        let concurrent = concurrency > 1;
        let task_queue = Arc::new(BlockingQueue::new(mem.shm, half, false, concurrent)?);
        let result_queue = Arc::new(BlockingQueue::new(mem.shm.add(half), half, true, concurrent)?);
        let terminated = Arc::new(AtomicBool::new(false));
        let handler = Arc::new(handler);

        let pool = ThreadPool::new(concurrency, {
            let terminated = terminated.clone();
            let task_queue = task_queue.clone();
            let result_queue = result_queue.clone();
            move |_id| executor_fetch(&terminated, &task_queue, &result_queue, handler.as_ref())
        });

        Ok(Xtasklet {
            terminated,
            task_queue,
            result_queue,
            pool: Some(pool),
        })
    }

    /// Metric-friendly count of worker threads actually running.
    pub fn concurrency(&self) -> usize {
        self.pool.as_ref().map(ThreadPool::size).unwrap_or(0)
    }
}

fn executor_fetch(
    terminated: &AtomicBool,
    task_queue: &BlockingQueue,
    result_queue: &BlockingQueue,
    handler: &(impl TaskHandler + ?Sized),
) {
    while !terminated.load(Ordering::SeqCst) {
        let raw = match task_queue.dequeue(None) {
            Ok(buf) => buf,
            Err(QueueError::Interrupted) => {
                if !terminated.load(Ordering::SeqCst) {
                    tracing::warn!("task queue interrupted without a shutdown in progress");
                }
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "dequeue task failed");
                continue;
            }
        };
        let (header, payload) = match TaskHeader::decode(&raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed task buffer");
                continue;
            }
        };
        let result_payload = handler.handle(payload);
        metrics::counter!("tee_xtasklet_tasks_handled_total").increment(1);
        let wire = header.encode(&result_payload);
        if let Err(e) = result_queue.enqueue(&wire, None) {
            if !matches!(e, QueueError::Interrupted) {
                metrics::counter!("tee_xtasklet_result_enqueue_failures_total").increment(1);
                tracing::warn!(error = %e, "enqueue task result failed");
            }
        }
    }
}

impl Drop for Xtasklet {
    fn drop(&mut self) {
        self.terminated.store(true, Ordering::SeqCst);
        self.result_queue.interrupt();
        self.task_queue.interrupt();
        if let Some(pool) = self.pool.take() {
            pool.finalize();
        }
        tracing::debug!("xtasklet destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;
    impl TaskHandler for Echo {
        fn handle(&self, payload: &[u8]) -> Vec<u8> {
            payload.iter().rev().copied().collect()
        }
    }

    #[test]
    fn executes_a_task_and_publishes_the_result() {
        let mut mem = vec![0u8; 8 + 4 * 520 + 8 + 4 * 520];
        let shm_size = mem.len();
        let shm = mem.as_mut_ptr();

        let tasklet = unsafe { Xtasklet::new(XtaskletMemory { shm, shm_size }, 1, Echo).unwrap() };

        // Act as the peer: a producer queue over the task half, a consumer
        // queue over the result half.
        let half = shm_size / 2;
        let peer_task_producer = unsafe { BlockingQueue::new(shm, half, true, false).unwrap() };
        let peer_result_consumer = unsafe { BlockingQueue::new(shm.add(half), half, false, false).unwrap() };

        let header = TaskHeader { magic: XTASK_BUF_MAGIC, id: 42 };
        let wire = header.encode(b"abc");
        peer_task_producer.enqueue(&wire, None).unwrap();

        let result = peer_result_consumer.dequeue(Some(Duration::from_secs(2))).unwrap();
        let (got_header, payload) = TaskHeader::decode(&result).unwrap();
        assert_eq!(got_header.id, 42);
        assert_eq!(payload, b"cba");

        drop(tasklet);
    }

    #[test]
    fn rejects_a_buffer_with_the_wrong_magic() {
        let buf = TaskHeader { magic: 0xdead_beef, id: 1 }.encode(b"x");
        let err = TaskHeader::decode(&buf).unwrap_err();
        assert!(matches!(err, QueueError::BadMagic { .. }));
    }

    #[test]
    fn rejects_a_truncated_buffer() {
        let err = TaskHeader::decode(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, QueueError::TruncatedTask));
    }
}
