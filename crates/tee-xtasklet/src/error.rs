//! Error taxonomy for the ring-queue transport and worker pool.

use thiserror::Error;

/// Failures surfaced by [`crate::queue::BlockingQueue`] and
/// [`crate::xtasklet::Xtasklet`].
///
/// Grounded on the `ret` codes returned by `BlockingEnqueue`/`BlockingDequeue`
/// in `original_source/.../xtasklet/blocking_queue.c`, given names instead of
/// the original's bare `int`/`BLOCKING_QUEUE_*` constants.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing memory region cannot hold the minimum two entries
    /// (`MIN_ENTRY_CNT`).
    #[error("shared memory region too small for a ring buffer")]
    RegionTooSmall,
    /// A single payload would never fit even when the queue is fully empty.
    #[error("payload of {size} bytes exceeds queue capacity of {capacity} bytes")]
    PayloadTooLarge {
        /// Size of the rejected payload.
        size: usize,
        /// Total queue capacity in bytes.
        capacity: usize,
    },
    /// `enqueue` called on a queue opened as a consumer.
    #[error("queue opened as consumer cannot enqueue")]
    NotAProducer,
    /// `dequeue` called on a queue opened as a producer.
    #[error("queue opened as producer cannot dequeue")]
    NotAConsumer,
    /// [`crate::queue::BlockingQueue::interrupt`] fired while a wait was in
    /// progress (`BLOCKING_QUEUE_INTERRUPTED`).
    #[error("queue wait was interrupted")]
    Interrupted,
    /// The caller-supplied timeout elapsed before the queue became
    /// non-full/non-empty.
    #[error("wait for queue space timed out")]
    TimedOut,
    /// The entry at the tail carries the invalid-metadata sentinel
    /// (`BLOCKING_QUEUE_INVALID_META_VALUE`) where a head-of-message entry
    /// was expected.
    #[error("entry at ring position {0} has no metadata")]
    CorruptMetadata(u32),
    /// The decoded entry size does not fit within its claimed span
    /// (`BLOCKING_QUEUE_LARGER_ENTRY`).
    #[error("entry claims size {size} but spans only {span} bytes")]
    OversizedEntry {
        /// Claimed payload size.
        size: i32,
        /// Byte span implied by the entry's `remain` block count.
        span: usize,
    },
    /// A dequeued task buffer's magic prefix did not match
    /// [`crate::xtasklet::XTASK_BUF_MAGIC`].
    #[error("task buffer magic mismatch: expected {expected:#x}, found {found:#x}")]
    BadMagic {
        /// Expected magic value.
        expected: u32,
        /// Magic value actually read.
        found: u32,
    },
    /// A dequeued task buffer was shorter than the fixed task header.
    #[error("task buffer shorter than the task header")]
    TruncatedTask,
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, QueueError>;
