//! Shared-memory block allocation and reference counting.
//!
//! `TEEC_AllocateSharedMemory` in the original client mmaps a block,
//! hands the caller a `TEEC_SharedMemory` with a raw `void *`, and
//! tracks liveness with `GetBnShmByOffset`/`AtomDecAndCompareWithZero` —
//! an atomic counter that is only actually locked around the unlink from
//! the context's shared-memory list. [`SharedMemoryBlock`] keeps that
//! same shape: the refcount is a bare [`AtomicUsize`] bumped and dropped
//! without a lock, and only freeing the backing mapping and returning
//! its id to the [`IdBitmap`] happens under a mutex.
//!
//! Per spec §3/§4.C, an allocated block whose flags are not
//! `shared-inout` is mmap'd against the owning context's driver fd at
//! `id × page_size`, so the same ioctl that hands the mapping to the TEE
//! can resolve it back to this host mapping; `shared-inout` blocks skip
//! the driver entirely and live in a plain heap buffer instead.

use std::os::fd::{BorrowedFd, RawFd};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use nix::unistd::{sysconf, SysconfVar};
use parking_lot::Mutex;
use tee_wire::error::TeeError;

/// `SharedMemory.flags` from spec §3: how the TEE may access the block,
/// plus the `shared-inout` escape hatch that keeps a buffer off the
/// driver mapping entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedMemFlags {
    /// The TEE only reads the buffer.
    Input,
    /// The TEE only writes the buffer.
    Output,
    /// The TEE both reads and writes the buffer.
    InOut,
    /// Both reads and writes, but never mapped into the driver: backed
    /// by a plain heap buffer instead of `mmap`.
    SharedInOut,
}

impl SharedMemFlags {
    fn needs_driver_mapping(self) -> bool {
        !matches!(self, SharedMemFlags::SharedInOut)
    }
}

/// The host page size, queried once via `sysconf(_SC_PAGESIZE)` and
/// used to turn a block's bitmap id into the mmap offset the driver
/// expects (`id × page_size`, spec §4.C).
fn page_size() -> usize {
    sysconf(SysconfVar::PAGE_SIZE)
        .ok()
        .flatten()
        .filter(|n| *n > 0)
        .map(|n| n as usize)
        .unwrap_or(4096)
}

/// Zero-filled heap allocation used by the `shared-inout` path, kept as
/// a raw pointer so [`SharedMemoryBlock`] and [`SharedMemoryHandle`] can
/// share ownership the same way they already do for a driver mapping.
fn alloc_heap(len: usize) -> Result<NonNull<u8>, TeeError> {
    let layout = std::alloc::Layout::array::<u8>(len).map_err(|_| TeeError::bad_parameters())?;
    let raw = unsafe { std::alloc::alloc_zeroed(layout) };
    NonNull::new(raw).ok_or(TeeError::OutOfMemory { origin: None, code: None })
}

/// Free a block obtained from [`alloc_heap`].
fn dealloc_heap(ptr: NonNull<u8>, len: usize) {
    if let Ok(layout) = std::alloc::Layout::array::<u8>(len) {
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

/// Maximum number of concurrently live shared-memory blocks per context,
/// matching the fixed-size bitmap the original driver binding uses to
/// hand out `shared_mem_id` values.
pub const MAX_SHARED_BLOCKS: usize = 256;

/// A fixed-capacity allocator for shared-memory block ids.
///
/// Grounded on the same bit-per-slot allocation pattern the cross-domain
/// proxy uses for its fd/pkg index bitmaps
/// (`original_source/src/tee_teleport/posix_proxy/src/fd_list.c`),
/// reused here for shared-memory ids instead of posix fds.
pub struct IdBitmap {
    words: Mutex<[u64; MAX_SHARED_BLOCKS / 64]>,
}

impl IdBitmap {
    /// Create an allocator with every id free.
    pub fn new() -> Self {
        IdBitmap {
            words: Mutex::new([0u64; MAX_SHARED_BLOCKS / 64]),
        }
    }

    /// Claim the lowest-numbered free id, or `None` if the pool is full.
    pub fn alloc(&self) -> Option<u32> {
        let mut words = self.words.lock();
        for (word_idx, word) in words.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = word.trailing_ones();
                *word |= 1 << bit;
                return Some((word_idx * 64 + bit as usize) as u32);
            }
        }
        None
    }

    /// Return an id to the free pool.
    pub fn free(&self, id: u32) {
        let mut words = self.words.lock();
        let word_idx = id as usize / 64;
        let bit = id as usize % 64;
        words[word_idx] &= !(1 << bit);
    }
}

impl Default for IdBitmap {
    fn default() -> Self {
        Self::new()
    }
}

/// A host-mapped buffer the TEE can read and write directly, identified
/// by the `shared_mem_id` carried in [`tee_wire::client::ClientParam::MemrefPartial`].
pub struct SharedMemoryBlock {
    id: u32,
    ptr: NonNull<u8>,
    len: usize,
    /// `true` when `ptr` is a driver mmap and must be `munmap`'d;
    /// `false` when it is a `shared-inout` heap allocation and must be
    /// `dealloc`'d instead (spec §3).
    mapped: bool,
    refcount: Arc<AtomicUsize>,
    ids: Arc<IdBitmap>,
}

// The mapping is shared (or, for shared-inout, a plain heap buffer);
// nothing about either is thread-affine.
unsafe impl Send for SharedMemoryBlock {}
unsafe impl Sync for SharedMemoryBlock {}

impl SharedMemoryBlock {
    /// Allocate a new zero-filled block of `len` bytes and claim an id
    /// for it from `ids`.
    ///
    /// Unless `flags` is [`SharedMemFlags::SharedInOut`], the block is
    /// `mmap`'d against `driver_fd` at `id × page_size` (spec §4.C) so
    /// the driver can resolve the same mapping on the TEE's behalf;
    /// `shared-inout` blocks skip the driver and use a plain heap
    /// buffer instead.
    pub fn allocate(
        ids: Arc<IdBitmap>,
        driver_fd: RawFd,
        len: usize,
        flags: SharedMemFlags,
    ) -> Result<Self, TeeError> {
        if len == 0 {
            return Err(TeeError::bad_parameters());
        }
        let id = ids.alloc().ok_or_else(TeeError::bad_parameters)?;

        let (ptr, mapped) = if flags.needs_driver_mapping() {
            let offset = id as i64 * page_size() as i64;
            let borrowed = unsafe { BorrowedFd::borrow_raw(driver_fd) };
            let ptr = unsafe {
                mmap(
                    None,
                    std::num::NonZeroUsize::new(len).expect("checked above"),
                    ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                    MapFlags::MAP_SHARED,
                    borrowed,
                    offset,
                )
            }
            .map_err(|_| {
                ids.free(id);
                TeeError::OutOfMemory { origin: None, code: None }
            })?;
            (ptr.cast(), true)
        } else {
            let ptr = alloc_heap(len).map_err(|e| {
                ids.free(id);
                e
            })?;
            (ptr, false)
        };

        Ok(SharedMemoryBlock {
            id,
            ptr,
            len,
            mapped,
            refcount: Arc::new(AtomicUsize::new(1)),
            ids,
        })
    }

    /// Identifier referenced by memref parameters.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Block length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the block is zero-length (never true for an allocated block).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrow the block's contents.
    ///
    /// # Safety
    /// Callers must not alias this with a concurrent `&mut [u8]` view of
    /// the same block while the TEE might also be writing through it.
    pub unsafe fn as_slice(&self) -> &[u8] {
        std::slice::from_raw_parts(self.ptr.as_ptr(), self.len)
    }

    /// Mutably borrow the block's contents.
    ///
    /// # Safety
    /// See [`Self::as_slice`].
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len)
    }

    /// Produce another reference-counted handle to the same block,
    /// mirroring the original `GetBnShmByOffset` + atomic increment.
    pub fn share(&self) -> SharedMemoryHandle {
        self.refcount.fetch_add(1, Ordering::AcqRel);
        SharedMemoryHandle {
            id: self.id,
            ptr: self.ptr,
            len: self.len,
            mapped: self.mapped,
            refcount: self.refcount.clone(),
            ids: self.ids.clone(),
        }
    }
}

impl Drop for SharedMemoryBlock {
    fn drop(&mut self) {
        if self.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            if self.mapped {
                let _ = unsafe { munmap(self.ptr.cast(), self.len) };
            } else {
                dealloc_heap(self.ptr, self.len);
            }
            self.ids.free(self.id);
        }
    }
}

/// A cloned, reference-counted view of a [`SharedMemoryBlock`] that does
/// not own the id's last reference.
pub struct SharedMemoryHandle {
    id: u32,
    ptr: NonNull<u8>,
    #[allow(dead_code)]
    len: usize,
    mapped: bool,
    refcount: Arc<AtomicUsize>,
    ids: Arc<IdBitmap>,
}

unsafe impl Send for SharedMemoryHandle {}
unsafe impl Sync for SharedMemoryHandle {}

impl SharedMemoryHandle {
    /// Identifier referenced by memref parameters.
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl Drop for SharedMemoryHandle {
    fn drop(&mut self) {
        if self.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            if self.mapped {
                let _ = unsafe { munmap(self.ptr.cast(), self.len) };
            } else {
                dealloc_heap(self.ptr, self.len);
            }
            self.ids.free(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::fd::AsRawFd;

    use super::*;

    fn backing_file(len: u64) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(len).unwrap();
        file
    }

    #[test]
    fn bitmap_allocates_lowest_free_id_and_reuses_after_free() {
        let bitmap = IdBitmap::new();
        let a = bitmap.alloc().unwrap();
        let b = bitmap.alloc().unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        bitmap.free(a);
        let c = bitmap.alloc().unwrap();
        assert_eq!(c, 0);
    }

    #[test]
    fn bitmap_exhausts_after_capacity() {
        let bitmap = IdBitmap::new();
        for _ in 0..MAX_SHARED_BLOCKS {
            assert!(bitmap.alloc().is_some());
        }
        assert!(bitmap.alloc().is_none());
    }

    #[test]
    fn allocate_rejects_zero_length() {
        let ids = Arc::new(IdBitmap::new());
        assert!(SharedMemoryBlock::allocate(ids, -1, 0, SharedMemFlags::InOut).is_err());
    }

    #[test]
    fn share_keeps_block_alive_until_last_drop() {
        let ids = Arc::new(IdBitmap::new());
        let file = backing_file(1 << 20);
        let block =
            SharedMemoryBlock::allocate(ids.clone(), file.as_file().as_raw_fd(), 64, SharedMemFlags::InOut)
                .unwrap();
        let id = block.id();
        let handle = block.share();
        drop(block);
        // id still reserved: the shared handle keeps it alive.
        assert!(ids.alloc().is_some()); // some other id, not the shared one
        drop(handle);
        let _ = id;
    }

    #[test]
    fn in_out_block_is_mapped_against_the_driver_fd() {
        let ids = Arc::new(IdBitmap::new());
        let file = backing_file(1 << 20);
        let mut block =
            SharedMemoryBlock::allocate(ids, file.as_file().as_raw_fd(), 64, SharedMemFlags::InOut).unwrap();
        unsafe {
            block.as_mut_slice()[0] = 0xAB;
            assert_eq!(block.as_slice()[0], 0xAB);
        }
    }

    #[test]
    fn shared_in_out_block_never_touches_the_driver_fd() {
        let ids = Arc::new(IdBitmap::new());
        // An invalid fd proves `shared-inout` never reaches the driver.
        let mut block = SharedMemoryBlock::allocate(ids, -1, 64, SharedMemFlags::SharedInOut).unwrap();
        unsafe {
            assert_eq!(block.as_slice(), &[0u8; 64][..]);
            block.as_mut_slice()[0] = 7;
            assert_eq!(block.as_slice()[0], 7);
        }
    }
}
