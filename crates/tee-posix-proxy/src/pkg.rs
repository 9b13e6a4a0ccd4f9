//! Large-buffer staging for the `OTHER_PKG_SEND`/`OTHER_PKG_RECV` calls
//! (spec §4.J).
//!
//! Grounded on `posix_proxy/include/fd_list.h` (`struct PkgTmpBuf`,
//! `FdListPutPkg`/`FdListGetPkg`/`FdListReleasePkgByIndex`/
//! `FdListDelTimeoutPkg`). The original keys a pkg by `(fd, teeIndex)`,
//! tracks a refcount bumped by `put`/`get` and dropped by `release`, and
//! documents that a caller must call release twice to actually free a
//! pkg's memory. This table preserves that two-phase completion
//! contract (`release_pkg_by_index` returns whether the entry was
//! actually dropped) even though Rust's allocator would free the buffer
//! correctly either way — callers on the TEE side still expect two
//! acknowledgements before considering the transfer fully retired.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::error::{ProxyError, Result};

const ONE_GIB: u64 = 1024 * 1024 * 1024;
const TIMEOUT_PER_CHUNK_US: u64 = 10_000_000;

/// How long a pkg of `len` bytes may sit unclaimed before the sweeper
/// reclaims it: one `10s` allowance per `1 GiB` chunk (rounded up),
/// minimum one chunk.
pub fn pkg_timeout_us(len: usize) -> u64 {
    let chunks = (len as u64 + ONE_GIB - 1) / ONE_GIB;
    chunks.max(1) * TIMEOUT_PER_CHUNK_US
}

fn now_us() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_micros() as u64).unwrap_or(0)
}

struct PkgEntry {
    buf: Vec<u8>,
    refcnt: u32,
    created_us: u64,
}

/// The `(fd, teeIndex)`-keyed pkg staging table.
pub struct PkgTable {
    inner: Mutex<HashMap<(i32, u64), PkgEntry>>,
}

impl PkgTable {
    /// An empty table.
    pub fn new() -> Self {
        PkgTable { inner: Mutex::new(HashMap::new()) }
    }

    /// Stage `buf` under `(fd, tee_index)` (`FdListPutPkg`). Fails if the
    /// key is already staged — the TEE must drain or cancel a pending
    /// transfer before reusing its index.
    pub fn put_pkg(&self, fd: i32, tee_index: u64, buf: Vec<u8>) -> Result<()> {
        let mut map = self.inner.lock();
        let key = (fd, tee_index);
        if map.contains_key(&key) {
            return Err(ProxyError::PkgAlreadyExists { fd, tee_index });
        }
        map.insert(key, PkgEntry { buf, refcnt: 1, created_us: now_us() });
        Ok(())
    }

    /// Fetch a clone of the staged buffer and bump its refcount
    /// (`FdListGetPkg`).
    pub fn get_pkg(&self, fd: i32, tee_index: u64) -> Result<Vec<u8>> {
        let mut map = self.inner.lock();
        let entry = map.get_mut(&(fd, tee_index)).ok_or(ProxyError::PkgNotFound { fd, tee_index })?;
        entry.refcnt += 1;
        Ok(entry.buf.clone())
    }

    /// Drop one reference to the pkg at `(fd, tee_index)`
    /// (`FdListReleasePkgByIndex`). Returns `true` once the refcount has
    /// reached zero and the entry has actually been removed — a fresh
    /// `put_pkg`/`get_pkg` pair needs two releases to fully retire.
    pub fn release_pkg_by_index(&self, fd: i32, tee_index: u64) -> Result<bool> {
        let mut map = self.inner.lock();
        let key = (fd, tee_index);
        let remaining = {
            let entry = map.get_mut(&key).ok_or(ProxyError::PkgNotFound { fd, tee_index })?;
            entry.refcnt = entry.refcnt.saturating_sub(1);
            entry.refcnt
        };
        if remaining == 0 {
            map.remove(&key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Force-remove a pkg regardless of its refcount. Used when a
    /// session tears down mid-transfer and no further release will ever
    /// arrive to balance the refcount naturally.
    pub fn cancel_pkg(&self, fd: i32, tee_index: u64) -> Result<()> {
        let mut map = self.inner.lock();
        map.remove(&(fd, tee_index)).map(|_| ()).ok_or(ProxyError::PkgNotFound { fd, tee_index })
    }

    /// Remove every entry whose age exceeds [`pkg_timeout_us`] for its
    /// size, evaluated against `now_us` (`FdListDelTimeoutPkg`). Returns
    /// the number of entries reclaimed.
    pub fn sweep_timeouts(&self, now_us: u64) -> usize {
        let mut map = self.inner.lock();
        let before = map.len();
        map.retain(|_, entry| now_us.saturating_sub(entry.created_us) < pkg_timeout_us(entry.buf.len()));
        before - map.len()
    }

    /// Copy `data` into the staged buffer at `offset`, without touching
    /// its refcount (`PkgSendWork`'s continuation branch, which gets and
    /// releases the pkg around a single `memcpy`).
    pub fn write_at(&self, fd: i32, tee_index: u64, offset: usize, data: &[u8]) -> Result<()> {
        let mut map = self.inner.lock();
        let entry = map.get_mut(&(fd, tee_index)).ok_or(ProxyError::PkgNotFound { fd, tee_index })?;
        let end = offset.checked_add(data.len()).ok_or(ProxyError::PointerOutOfBounds { index: 0, size: data.len() })?;
        if end > entry.buf.len() {
            return Err(ProxyError::PointerOutOfBounds { index: 0, size: data.len() });
        }
        entry.buf[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Copy `len` bytes out of the staged buffer starting at `offset`
    /// (`PkgRecvWork`).
    pub fn read_at(&self, fd: i32, tee_index: u64, offset: usize, len: usize) -> Result<Vec<u8>> {
        let map = self.inner.lock();
        let entry = map.get(&(fd, tee_index)).ok_or(ProxyError::PkgNotFound { fd, tee_index })?;
        let end = offset.checked_add(len).ok_or(ProxyError::PointerOutOfBounds { index: 0, size: len })?;
        if end > entry.buf.len() {
            return Err(ProxyError::PointerOutOfBounds { index: 0, size: len });
        }
        Ok(entry.buf[offset..end].to_vec())
    }

    /// Number of entries currently staged. Exposed for tests and
    /// metrics gauges.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PkgTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_then_release_twice_frees_the_entry() {
        let table = PkgTable::new();
        table.put_pkg(3, 1, vec![1, 2, 3]).unwrap();
        assert_eq!(table.get_pkg(3, 1).unwrap(), vec![1, 2, 3]);
        assert_eq!(table.release_pkg_by_index(3, 1).unwrap(), false);
        assert_eq!(table.release_pkg_by_index(3, 1).unwrap(), true);
        assert!(table.is_empty());
    }

    #[test]
    fn put_rejects_a_duplicate_key() {
        let table = PkgTable::new();
        table.put_pkg(3, 1, vec![0]).unwrap();
        assert!(matches!(
            table.put_pkg(3, 1, vec![1]).unwrap_err(),
            ProxyError::PkgAlreadyExists { fd: 3, tee_index: 1 }
        ));
    }

    #[test]
    fn get_and_release_reject_an_unknown_key() {
        let table = PkgTable::new();
        assert!(matches!(table.get_pkg(9, 9).unwrap_err(), ProxyError::PkgNotFound { .. }));
        assert!(matches!(table.release_pkg_by_index(9, 9).unwrap_err(), ProxyError::PkgNotFound { .. }));
    }

    #[test]
    fn cancel_removes_regardless_of_refcount() {
        let table = PkgTable::new();
        table.put_pkg(1, 1, vec![0; 16]).unwrap();
        table.get_pkg(1, 1).unwrap();
        table.cancel_pkg(1, 1).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn timeout_scales_with_size_in_one_gib_chunks() {
        assert_eq!(pkg_timeout_us(1), 10_000_000);
        assert_eq!(pkg_timeout_us(ONE_GIB as usize), 10_000_000);
        assert_eq!(pkg_timeout_us(ONE_GIB as usize + 1), 20_000_000);
    }

    #[test]
    fn sweep_reclaims_only_entries_older_than_their_timeout() {
        let table = PkgTable::new();
        table.put_pkg(1, 1, vec![0; 16]).unwrap();
        let created = table.inner.lock().get(&(1, 1)).unwrap().created_us;
        let reclaimed = table.sweep_timeouts(created + 5_000_000);
        assert_eq!(reclaimed, 0);
        let reclaimed = table.sweep_timeouts(created + 11_000_000);
        assert_eq!(reclaimed, 1);
        assert!(table.is_empty());
    }
}
