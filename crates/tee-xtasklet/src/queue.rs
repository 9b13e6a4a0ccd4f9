//! A fixed-capacity ring buffer over a shared-memory region, supporting one
//! blocking producer side and one blocking consumer side that may live in
//! different processes (spec §5 "Xtasklet"/"blocking queue" transport).
//!
//! Grounded on
//! `original_source/src/tee_teleport/posix_proxy/src/xtasklet/blocking_queue.c`
//! and its header. The original publishes a new head/tail position with an
//! `isb`+`dmb ish` pair immediately before the plain store; here that is
//! expressed as an `AtomicU32` store/load pair with `Release`/`Acquire`
//! ordering, which gives the same producer-publishes/consumer-observes
//! guarantee without inline assembly.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{QueueError, Result};

/// Bytes of payload held by one ring entry (`CONFIG_BLOCKING_QUEUE_ENTRY_SIZE`).
pub const ENTRY_DATA_SIZE: usize = 512;
/// Sleep quantum used while a wait is not satisfied by the fast-path spin
/// budget (`CONFIG_BLOCKING_QUEUE_SLEEP_US`).
pub const SLEEP_QUANTUM: Duration = Duration::from_micros(100);
/// Number of wait iterations serviced by spinning before falling back to
/// sleeping (`CONFIG_BLOCKING_QUEUE_ACC_CNT`).
pub const SPIN_BUDGET: u32 = 2000;
/// Sentinel marking a continuation block's metadata word
/// (`BLOCKING_QUEUE_INVALID_META_VALUE`).
const INVALID_META: i32 = -1;
/// Minimum number of ring entries a region must hold (`MIN_ENTRY_CNT`).
const MIN_ENTRY_CNT: usize = 2;

const META_SIZE: usize = 8; // two i32 words
const ENTRY_STRIDE: usize = META_SIZE + ENTRY_DATA_SIZE;
const HEADER_SIZE: usize = 8; // two u32 position words

/// Split a raw ring position into `(index, flip-bit)`, mirroring the
/// `union Position` bitfield (`at` in the high 31 bits, `flip` in bit 0).
fn decode(val: u32) -> (u32, bool) {
    (val >> 1, (val & 1) != 0)
}

fn encode(at: u32, flip: bool) -> u32 {
    (at << 1) | (flip as u32)
}

/// One side (producer or consumer) of a shared-memory ring buffer.
///
/// The memory pointed to by `mem` is not owned by this type; the caller
/// (typically the shm pool in `tee-client`, or a `teecd` mapping of agent
/// shared memory) must keep it alive and correctly sized for as long as the
/// queue exists. Both sides of one logical queue pair point at the same
/// bytes from (possibly) different address spaces, which is why `head` and
/// `tail` are read and written through atomics with explicit fences rather
/// than through a process-local lock.
pub struct BlockingQueue {
    mem: *mut u8,
    entries_nr: u32,
    is_producer: bool,
    interrupt: AtomicBool,
    spin_budget: AtomicU32,
    sync: Option<Mutex<()>>,
}

// SAFETY: `mem` points at a region intended for concurrent cross-thread and
// cross-process access; every access to it goes through the atomic position
// words or is confined to the producer-only / consumer-only entry range for
// a given transfer, which the ring protocol guarantees never overlaps the
// other side's in-flight range.
unsafe impl Send for BlockingQueue {}
unsafe impl Sync for BlockingQueue {}

impl BlockingQueue {
    /// Lay a new ring buffer over `mem[..mem_size]`.
    ///
    /// # Safety
    /// `mem` must be valid for reads and writes of `mem_size` bytes for the
    /// lifetime of the returned queue, and must be 4-byte aligned. When
    /// `is_producer` is `false` this call resets only the tail position,
    /// leaving the head (and its backing entries) to the peer that creates
    /// the producer side first, matching `InitRingbuffer`.
    pub unsafe fn new(mem: *mut u8, mem_size: usize, is_producer: bool, concurrent: bool) -> Result<Self> {
        if mem_size < HEADER_SIZE + MIN_ENTRY_CNT * ENTRY_STRIDE {
            return Err(QueueError::RegionTooSmall);
        }
        let entries_nr = ((mem_size - HEADER_SIZE) / ENTRY_STRIDE) as u32;
        let queue = BlockingQueue {
            mem,
            entries_nr,
            is_producer,
            interrupt: AtomicBool::new(false),
            spin_budget: AtomicU32::new(SPIN_BUDGET),
            sync: if concurrent { Some(Mutex::new(())) } else { None },
        };
        if is_producer {
            std::ptr::write_bytes(queue.entries_ptr(), 0, entries_nr as usize * ENTRY_STRIDE);
            queue.set_head(0, false);
        } else {
            queue.set_tail(0, false);
        }
        tracing::debug!(entries_nr, is_producer, "blocking queue created");
        Ok(queue)
    }

    /// Total payload bytes this queue can ever hold at once.
    pub fn capacity(&self) -> usize {
        self.entries_nr as usize * ENTRY_DATA_SIZE
    }

    /// Set the interrupt flag; any wait in progress or started afterwards
    /// returns [`QueueError::Interrupted`] within one sleep quantum.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    fn header(&self) -> *const AtomicU32 {
        self.mem as *const AtomicU32
    }

    fn head_atomic(&self) -> &AtomicU32 {
        unsafe { &*self.header() }
    }

    fn tail_atomic(&self) -> &AtomicU32 {
        unsafe { &*self.header().add(1) }
    }

    fn entries_ptr(&self) -> *mut u8 {
        unsafe { self.mem.add(HEADER_SIZE) }
    }

    fn entry_ptr(&self, idx: u32) -> *mut u8 {
        unsafe { self.entries_ptr().add(idx as usize * ENTRY_STRIDE) }
    }

    fn set_head(&self, at: u32, flip: bool) {
        self.head_atomic().store(encode(at, flip), Ordering::Release);
    }

    fn set_tail(&self, at: u32, flip: bool) {
        self.tail_atomic().store(encode(at, flip), Ordering::Release);
    }

    fn head_tail(&self) -> (u32, bool, u32, bool) {
        let (head, head_flip) = decode(self.head_atomic().load(Ordering::Acquire));
        let (tail, tail_flip) = decode(self.tail_atomic().load(Ordering::Acquire));
        (head, head_flip, tail, tail_flip)
    }

    fn set_meta(&self, idx: u32, size: i32, remain: i32) {
        unsafe {
            let p = self.entry_ptr(idx) as *mut i32;
            p.write(size);
            p.add(1).write(remain);
        }
    }

    fn get_meta(&self, idx: u32) -> (i32, i32) {
        unsafe {
            let p = self.entry_ptr(idx) as *const i32;
            (p.read(), p.add(1).read())
        }
    }

    fn entry_data(&self, idx: u32) -> *mut u8 {
        unsafe { self.entry_ptr(idx).add(META_SIZE) }
    }

    /// Block until `blocking_acc`'s spin budget is exhausted, then sleep one
    /// quantum, tracking the caller's remaining timeout (`Blocking`).
    fn block_once(&self, remaining: &mut Option<Duration>) -> Result<()> {
        if let Some(r) = remaining {
            if *r < SLEEP_QUANTUM {
                return Err(QueueError::TimedOut);
            }
        }
        let prev = self.spin_budget.load(Ordering::Relaxed);
        if prev == 0 {
            std::thread::sleep(SLEEP_QUANTUM);
            if let Some(r) = remaining {
                *r -= SLEEP_QUANTUM;
            }
        } else {
            self.spin_budget.store(prev - 1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn unblock(&self) {
        self.spin_budget.fetch_add(SPIN_BUDGET, Ordering::Relaxed);
    }

    fn lock(&self) -> Option<std::sync::MutexGuard<'_, ()>> {
        self.sync.as_ref().map(|m| m.lock().unwrap_or_else(|p| p.into_inner()))
    }

    /// Push `src` onto the queue, blocking until enough contiguous entries
    /// are free or `timeout` elapses (`BlockingEnqueue`). `timeout` of `None`
    /// blocks indefinitely, matching the original's `timeoutUs == -1`.
    pub fn enqueue(&self, src: &[u8], timeout: Option<Duration>) -> Result<()> {
        if !self.is_producer {
            return Err(QueueError::NotAProducer);
        }
        if src.len() > self.capacity() {
            return Err(QueueError::PayloadTooLarge {
                size: src.len(),
                capacity: self.capacity(),
            });
        }
        let _guard = self.lock();
        let total = src.len().div_ceil(ENTRY_DATA_SIZE).max(1) as u32;
        let len = self.entries_nr;
        let mut remaining = timeout;
        let (head, head_flip) = loop {
            if self.is_interrupted() {
                return Err(QueueError::Interrupted);
            }
            let (head, head_flip, tail, tail_flip) = self.head_tail();
            let next_head = (head + total) % len;
            let next_head_flip = ((head + total) >= len) ^ head_flip;
            let is_full = (next_head_flip != tail_flip && next_head >= tail)
                || (head_flip != tail_flip && next_head_flip == tail_flip);
            if !is_full {
                break (head, head_flip);
            }
            self.block_once(&mut remaining)?;
        };
        self.unblock();

        let next_head = (head + total) % len;
        let next_head_flip = ((head + total) >= len) ^ head_flip;
        let mut offset = 0usize;
        let mut i = head;
        loop {
            if i != head {
                self.set_meta(i, INVALID_META, INVALID_META);
            } else {
                self.set_meta(i, src.len() as i32, (total - 1) as i32);
            }
            let cnt = (src.len() - offset).min(ENTRY_DATA_SIZE);
            unsafe {
                std::ptr::copy_nonoverlapping(src.as_ptr().add(offset), self.entry_data(i), cnt);
            }
            offset += cnt;
            i = (i + 1) % len;
            if i == next_head {
                break;
            }
        }
        self.set_head(next_head, next_head_flip);
        Ok(())
    }

    /// Pop the next message from the queue, blocking until one is available
    /// or `timeout` elapses (`BlockingDequeue`).
    pub fn dequeue(&self, timeout: Option<Duration>) -> Result<Vec<u8>> {
        if self.is_producer {
            return Err(QueueError::NotAConsumer);
        }
        let _guard = self.lock();
        let len = self.entries_nr;
        let mut remaining = timeout;
        let (tail, tail_flip) = loop {
            if self.is_interrupted() {
                return Err(QueueError::Interrupted);
            }
            let (head, head_flip, tail, tail_flip) = self.head_tail();
            let is_empty = head_flip == tail_flip && head == tail;
            if !is_empty {
                break (tail, tail_flip);
            }
            self.block_once(&mut remaining)?;
        };
        self.unblock();

        let (size, remain) = self.get_meta(tail);
        if size == INVALID_META || remain == INVALID_META {
            return Err(QueueError::CorruptMetadata(tail));
        }
        let span = (remain as usize + 1) * ENTRY_DATA_SIZE;
        if size as usize > span {
            return Err(QueueError::OversizedEntry { size, span });
        }

        let mut dst = vec![0u8; size as usize];
        let next_tail = (tail + remain as u32 + 1) % len;
        let next_tail_flip = ((tail + remain as u32 + 1) >= len) ^ tail_flip;
        let mut offset = 0usize;
        let mut i = tail;
        loop {
            let cnt = (size as usize - offset).min(ENTRY_DATA_SIZE);
            unsafe {
                std::ptr::copy_nonoverlapping(self.entry_data(i), dst.as_mut_ptr().add(offset), cnt);
            }
            offset += cnt;
            i = (i + 1) % len;
            if i == next_tail {
                break;
            }
        }
        self.set_tail(next_tail, next_tail_flip);
        Ok(dst)
    }
}

impl Drop for BlockingQueue {
    fn drop(&mut self) {
        if !self.is_interrupted() {
            tracing::warn!("blocking queue dropped without being interrupted first");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pair(region_entries: usize) -> (Vec<u8>, Vec<u8>) {
        let half = HEADER_SIZE + region_entries * ENTRY_STRIDE;
        (vec![0u8; half], vec![0u8; half])
    }

    #[test]
    fn round_trips_a_small_message() {
        let (mut prod_mem, _) = make_pair(4);
        let len = prod_mem.len();
        let producer = unsafe { BlockingQueue::new(prod_mem.as_mut_ptr(), len, true, false).unwrap() };
        let consumer = unsafe { BlockingQueue::new(prod_mem.as_mut_ptr(), len, false, false).unwrap() };
        producer.enqueue(b"hello tasklet", None).unwrap();
        let got = consumer.dequeue(None).unwrap();
        assert_eq!(got, b"hello tasklet");
    }

    #[test]
    fn round_trips_a_multi_block_message() {
        let (mut prod_mem, _) = make_pair(6);
        let len = prod_mem.len();
        let producer = unsafe { BlockingQueue::new(prod_mem.as_mut_ptr(), len, true, false).unwrap() };
        let consumer = unsafe { BlockingQueue::new(prod_mem.as_mut_ptr(), len, false, false).unwrap() };
        let payload: Vec<u8> = (0..(ENTRY_DATA_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        producer.enqueue(&payload, None).unwrap();
        let got = consumer.dequeue(None).unwrap();
        assert_eq!(got, payload);
    }

    #[test]
    fn rejects_oversized_payload() {
        let (mut prod_mem, _) = make_pair(2);
        let len = prod_mem.len();
        let producer = unsafe { BlockingQueue::new(prod_mem.as_mut_ptr(), len, true, false).unwrap() };
        let payload = vec![0u8; ENTRY_DATA_SIZE * 3];
        let err = producer.enqueue(&payload, None).unwrap_err();
        assert!(matches!(err, QueueError::PayloadTooLarge { .. }));
    }

    #[test]
    fn interrupt_unblocks_a_pending_dequeue_promptly() {
        let (mut prod_mem, _) = make_pair(4);
        let len = prod_mem.len();
        let consumer = std::sync::Arc::new(unsafe {
            BlockingQueue::new(prod_mem.as_mut_ptr(), len, false, true).unwrap()
        });
        let waiter = consumer.clone();
        let handle = std::thread::spawn(move || waiter.dequeue(None));
        std::thread::sleep(Duration::from_micros(50));
        let start = Instant::now();
        consumer.interrupt();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(QueueError::Interrupted)));
        assert!(start.elapsed() < Duration::from_micros(50_000));
    }

    #[test]
    fn enqueue_blocks_until_space_frees_up() {
        // A ring always sacrifices one entry to disambiguate full from
        // empty, so 3 entries hold at most 2 single-block messages in
        // flight at once.
        let (mut prod_mem, _) = make_pair(3);
        let len = prod_mem.len();
        let producer = std::sync::Arc::new(unsafe {
            BlockingQueue::new(prod_mem.as_mut_ptr(), len, true, true).unwrap()
        });
        let consumer = unsafe { BlockingQueue::new(prod_mem.as_mut_ptr(), len, false, true).unwrap() };
        producer.enqueue(&[1u8; ENTRY_DATA_SIZE], None).unwrap();
        producer.enqueue(&[2u8; ENTRY_DATA_SIZE], None).unwrap();

        let blocked = producer.clone();
        let handle = std::thread::spawn(move || blocked.enqueue(&[3u8; ENTRY_DATA_SIZE], None));
        std::thread::sleep(Duration::from_millis(5));
        let first = consumer.dequeue(None).unwrap();
        assert_eq!(first, vec![1u8; ENTRY_DATA_SIZE]);
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn timeout_fires_on_empty_queue() {
        let (mut prod_mem, _) = make_pair(4);
        let len = prod_mem.len();
        let consumer = unsafe { BlockingQueue::new(prod_mem.as_mut_ptr(), len, false, false).unwrap() };
        let err = consumer.dequeue(Some(Duration::from_micros(10))).unwrap_err();
        assert!(matches!(err, QueueError::TimedOut));
    }

    #[test]
    fn region_too_small_is_rejected() {
        let mut mem = vec![0u8; HEADER_SIZE + ENTRY_STRIDE];
        let len = mem.len();
        let err = unsafe { BlockingQueue::new(mem.as_mut_ptr(), len, true, false).unwrap_err() };
        assert!(matches!(err, QueueError::RegionTooSmall));
    }
}
