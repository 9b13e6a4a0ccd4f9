//! The secure-storage filesystem agent: proxies `TEE_FS_*` calls a trusted
//! application makes for real files on the host's filesystem.
//!
//! Grounded on `original_source/src/teecd/fs_work_agent.{h,c}`
//! (`struct SecStorageType`, `g_fsWorkTbl`, `OpenWork`/`ReadWork`/etc). The
//! control-buffer header is packed the same way
//! [`tee_broker::login`](../../tee_broker/login/index.html)-style wire
//! helpers pack theirs: fixed-width native-endian fields read by offset,
//! since the layout is a contract with the TEE side rather than something
//! this crate gets to choose.

pub mod paths;

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::error::{AgentError, Result};
use paths::StorageRoots;

/// Maximum bytes a single FS-agent name field may carry
/// (`FILE_NAME_MAX_BUF`).
pub const FILE_NAME_MAX_BUF: usize = 256;
/// `RLIMIT_NOFILE` this agent raises its soft limit to at startup
/// (`FILE_NUM_LIMIT_MAX`), so a TA opening many secure-storage files at
/// once doesn't starve the rest of the host process.
pub const FILE_NUM_LIMIT_MAX: u64 = 1024;

const HEADER_LEN: usize = 28;

/// `enum FsCmdType` — selects which `args` arm of the control buffer is
/// populated and which operation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FsCmd {
    Open = 0,
    Close = 1,
    Read = 2,
    Write = 3,
    Seek = 4,
    Remove = 5,
    Truncate = 6,
    Rename = 7,
    Create = 8,
    Info = 9,
    Access = 10,
    Access2 = 11,
    Fsync = 12,
    Cp = 13,
    DiskUsage = 14,
    DeleteAll = 15,
}

impl FsCmd {
    fn from_u32(v: u32) -> Result<Self> {
        Ok(match v {
            0 => FsCmd::Open,
            1 => FsCmd::Close,
            2 => FsCmd::Read,
            3 => FsCmd::Write,
            4 => FsCmd::Seek,
            5 => FsCmd::Remove,
            6 => FsCmd::Truncate,
            7 => FsCmd::Rename,
            8 => FsCmd::Create,
            9 => FsCmd::Info,
            10 => FsCmd::Access,
            11 => FsCmd::Access2,
            12 => FsCmd::Fsync,
            13 => FsCmd::Cp,
            14 => FsCmd::DiskUsage,
            15 => FsCmd::DeleteAll,
            other => return Err(AgentError::MalformedRequest(Box::leak(format!("unknown fs cmd {other}").into_boxed_str()))),
        })
    }
}

/// The 28-byte header every FS control buffer carries ahead of its
/// command-specific argument bytes (`struct SecStorageType`'s scalar
/// fields).
struct Header {
    cmd: FsCmd,
    user_id: u32,
    storage_id: u32,
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_ne_bytes(buf[off..off + 4].try_into().unwrap())
}

fn read_i32(buf: &[u8], off: usize) -> i32 {
    i32::from_ne_bytes(buf[off..off + 4].try_into().unwrap())
}

fn write_i32(buf: &mut [u8], off: usize, v: i32) {
    buf[off..off + 4].copy_from_slice(&v.to_ne_bytes());
}

fn write_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_ne_bytes());
}

fn read_name(buf: &[u8], len_off: usize) -> Result<String> {
    let len = read_u32(buf, len_off) as usize;
    let start = len_off + 4;
    let bytes = buf
        .get(start..start + len)
        .ok_or(AgentError::MalformedRequest("name field runs past the control buffer"))?;
    let bytes = match bytes.iter().position(|&b| b == 0) {
        Some(nul) => &bytes[..nul],
        None => bytes,
    };
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| AgentError::MalformedRequest("name field is not valid UTF-8"))
}

/// Read a name of known `len` starting at `off` with no length prefix of
/// its own, for the two-length-then-concatenated-buffer shapes (`rename`,
/// `cp`), where the lengths live in separate fixed fields ahead of the
/// buffer rather than immediately before each name.
fn read_raw_name(buf: &[u8], off: usize, len: usize) -> Result<String> {
    let bytes = buf
        .get(off..off + len)
        .ok_or(AgentError::MalformedRequest("name field runs past the control buffer"))?;
    let bytes = match bytes.iter().position(|&b| b == 0) {
        Some(nul) => &bytes[..nul],
        None => bytes,
    };
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| AgentError::MalformedRequest("name field is not valid UTF-8"))
}

fn set_ret(buf: &mut [u8], ret: i32) {
    write_i32(buf, 4, ret);
}

fn set_ret2(buf: &mut [u8], ret2: i32) {
    write_i32(buf, 8, ret2);
}

fn set_error(buf: &mut [u8], errno: i32) {
    write_u32(buf, 24, errno as u32);
}

/// Open handles this agent keeps on behalf of TAs, keyed by the handle
/// value returned to the TEE (the open file's raw fd, mirroring the
/// original's use of `fileno()` as the handle).
pub struct FsAgent {
    open_files: Mutex<HashMap<i32, File>>,
    roots: StorageRoots,
}

impl Default for FsAgent {
    fn default() -> Self {
        Self::new(StorageRoots::default())
    }
}

impl FsAgent {
    /// Construct an agent rooted at `roots`, with no open files, and raise
    /// this process's `RLIMIT_NOFILE` soft limit to [`FILE_NUM_LIMIT_MAX`]
    /// (`SetFileNumLimit`).
    pub fn new(roots: StorageRoots) -> Self {
        raise_file_limit();
        FsAgent { open_files: Mutex::new(HashMap::new()), roots }
    }

    /// Dispatch one control-buffer request in place, writing the reply
    /// back into the same buffer (`FsWorkThread`'s per-iteration body).
    pub fn dispatch(&self, control: &mut [u8]) {
        let header = match self.parse_header(control) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(error = %e, "malformed fs agent request");
                set_ret(control, -1);
                return;
            }
        };

        let outcome = match header.cmd {
            FsCmd::Open | FsCmd::Create => self.open_work(control, &header),
            FsCmd::Close => self.close_work(control),
            FsCmd::Read => self.read_work(control),
            FsCmd::Write => self.write_work(control),
            FsCmd::Seek => self.seek_work(control),
            FsCmd::Remove => self.remove_work(control, &header),
            FsCmd::Truncate => self.truncate_work(control, &header),
            FsCmd::Rename => self.rename_work(control, &header),
            FsCmd::Info => self.info_work(control),
            FsCmd::Access | FsCmd::Access2 => self.access_work(control, &header),
            FsCmd::Fsync => self.fsync_work(control),
            FsCmd::Cp => self.cp_work(control, &header),
            FsCmd::DiskUsage => self.disk_usage_work(control),
            FsCmd::DeleteAll => self.delete_all_work(control, &header),
        };

        if let Err(e) = outcome {
            tracing::warn!(error = %e, cmd = ?header.cmd as u32, "fs agent request failed");
        }
    }

    fn parse_header(&self, buf: &[u8]) -> Result<Header> {
        if buf.len() < HEADER_LEN {
            return Err(AgentError::MalformedRequest("control buffer shorter than the fs header"));
        }
        Ok(Header {
            cmd: FsCmd::from_u32(read_u32(buf, 0))?,
            user_id: read_u32(buf, 12),
            storage_id: read_u32(buf, 16),
        })
    }

    fn resolve(&self, buf: &[u8], header: &Header, name_len_off: usize) -> Result<PathBuf> {
        let _ = header.storage_id;
        let name = read_name(buf, name_len_off)?;
        paths::resolve_path(&name, header.user_id, &self.roots)
    }

    fn open_work(&self, buf: &mut [u8], header: &Header) -> Result<()> {
        const MODE_OFF: usize = HEADER_LEN;
        const NAME_LEN_OFF: usize = HEADER_LEN + 4;

        let path = match self.resolve(buf, header, NAME_LEN_OFF) {
            Ok(p) => p,
            Err(_) => {
                set_ret(buf, -1);
                return Ok(());
            }
        };

        let creating = header.cmd == FsCmd::Create;
        let mode = std::str::from_utf8(&buf[MODE_OFF..MODE_OFF + 4])
            .ok()
            .map(|s| s.trim_end_matches('\0').to_owned())
            .unwrap_or_default();

        if !creating && !path.exists() {
            set_ret(buf, -1);
            set_error(buf, libc::ENOENT);
            return Ok(());
        }

        paths::ensure_parent_dir(&path)?;

        let mut options = OpenOptions::new();
        if creating || mode.contains('w') {
            options.write(true).create(true).truncate(!mode.contains('a'));
        }
        if mode.contains('a') {
            options.append(true).create(true);
        }
        if mode.contains('+') {
            options.read(true).write(true);
        }
        if mode.is_empty() || mode.starts_with('r') {
            options.read(true);
        }

        match options.open(&path) {
            Ok(file) => {
                let fd = file.as_raw_fd();
                self.open_files.lock().insert(fd, file);
                set_ret(buf, fd);
            }
            Err(e) => {
                set_ret(buf, -1);
                set_error(buf, e.raw_os_error().unwrap_or(libc::EIO));
            }
        }
        Ok(())
    }

    fn close_work(&self, buf: &mut [u8]) -> Result<()> {
        let fd = read_i32(buf, HEADER_LEN);
        match self.open_files.lock().remove(&fd) {
            Some(file) => {
                drop(file);
                set_ret(buf, 0);
            }
            None => {
                set_ret(buf, -1);
                set_error(buf, libc::EBADF);
            }
        }
        Ok(())
    }

    fn read_work(&self, buf: &mut [u8]) -> Result<()> {
        let fd = read_i32(buf, HEADER_LEN);
        let count = read_u32(buf, HEADER_LEN + 4) as usize;
        let data_off = HEADER_LEN + 8;

        let mut files = self.open_files.lock();
        let Some(file) = files.get_mut(&fd) else {
            set_ret(buf, 0);
            set_ret2(buf, -1);
            set_error(buf, libc::EBADF);
            return Ok(());
        };

        let dest = &mut buf[data_off..data_off + count];
        match file.read(dest) {
            Ok(n) => {
                set_ret(buf, n as i32);
                set_ret2(buf, 0);
            }
            Err(e) => {
                set_ret(buf, 0);
                set_ret2(buf, -1);
                set_error(buf, e.raw_os_error().unwrap_or(libc::EIO));
            }
        }
        Ok(())
    }

    fn write_work(&self, buf: &mut [u8]) -> Result<()> {
        let fd = read_i32(buf, HEADER_LEN);
        let count = read_u32(buf, HEADER_LEN + 4) as usize;
        let data_off = HEADER_LEN + 8;

        let mut files = self.open_files.lock();
        let Some(file) = files.get_mut(&fd) else {
            set_ret(buf, 0);
            set_error(buf, libc::EBADF);
            return Ok(());
        };

        let src = buf[data_off..data_off + count].to_vec();
        match file.write(&src) {
            Ok(n) => set_ret(buf, n as i32),
            Err(e) => {
                set_ret(buf, -1);
                set_error(buf, e.raw_os_error().unwrap_or(libc::EIO));
            }
        }
        Ok(())
    }

    fn seek_work(&self, buf: &mut [u8]) -> Result<()> {
        let fd = read_i32(buf, HEADER_LEN);
        let offset = read_i32(buf, HEADER_LEN + 4) as i64;
        let whence = read_u32(buf, HEADER_LEN + 8);

        let mut files = self.open_files.lock();
        let Some(file) = files.get_mut(&fd) else {
            set_ret(buf, -1);
            set_error(buf, libc::EBADF);
            return Ok(());
        };

        let pos = match whence {
            0 => SeekFrom::Start(offset as u64),
            1 => SeekFrom::Current(offset),
            2 => SeekFrom::End(offset),
            _ => {
                set_ret(buf, -1);
                set_error(buf, libc::EINVAL);
                return Ok(());
            }
        };
        match file.seek(pos) {
            Ok(_) => set_ret(buf, 0),
            Err(e) => {
                set_ret(buf, -1);
                set_error(buf, e.raw_os_error().unwrap_or(libc::EIO));
            }
        }
        Ok(())
    }

    fn remove_work(&self, buf: &mut [u8], header: &Header) -> Result<()> {
        let path = match self.resolve(buf, header, HEADER_LEN) {
            Ok(p) => p,
            Err(_) => {
                set_ret(buf, -1);
                return Ok(());
            }
        };
        match remove_recursive(&path) {
            Ok(()) => set_ret(buf, 0),
            Err(e) => {
                set_ret(buf, -1);
                set_error(buf, e.raw_os_error().unwrap_or(libc::EIO));
            }
        }
        Ok(())
    }

    fn truncate_work(&self, buf: &mut [u8], header: &Header) -> Result<()> {
        let len = read_u32(buf, HEADER_LEN) as u64;
        let path = match self.resolve(buf, header, HEADER_LEN + 4) {
            Ok(p) => p,
            Err(_) => {
                set_ret(buf, -1);
                return Ok(());
            }
        };
        let file = File::options().write(true).open(&path)?;
        match file.set_len(len) {
            Ok(()) => set_ret(buf, 0),
            Err(e) => {
                set_ret(buf, -1);
                set_error(buf, e.raw_os_error().unwrap_or(libc::EIO));
            }
        }
        Ok(())
    }

    fn rename_work(&self, buf: &mut [u8], header: &Header) -> Result<()> {
        let old_len = read_u32(buf, HEADER_LEN) as usize;
        let new_len = read_u32(buf, HEADER_LEN + 4) as usize;
        let buffer_off = HEADER_LEN + 8;

        let old_name = read_raw_name(buf, buffer_off, old_len)?;
        let new_name = read_raw_name(buf, buffer_off + old_len, new_len)?;

        let old_path = paths::resolve_path(&old_name, header.user_id, &self.roots);
        let new_path = paths::resolve_path(&new_name, header.user_id, &self.roots);
        match (old_path, new_path) {
            (Ok(from), Ok(to)) => match std::fs::rename(&from, &to) {
                Ok(()) => set_ret(buf, 0),
                Err(e) => {
                    set_ret(buf, -1);
                    set_error(buf, e.raw_os_error().unwrap_or(libc::EIO));
                }
            },
            _ => set_ret(buf, -1),
        }
        Ok(())
    }

    fn info_work(&self, buf: &mut [u8]) -> Result<()> {
        let fd = read_i32(buf, HEADER_LEN);
        let mut files = self.open_files.lock();
        let Some(file) = files.get_mut(&fd) else {
            set_ret(buf, -1);
            set_error(buf, libc::EBADF);
            return Ok(());
        };
        match (file.metadata(), file.stream_position()) {
            (Ok(meta), Ok(pos)) => {
                write_u32(buf, HEADER_LEN + 4, pos as u32);
                write_u32(buf, HEADER_LEN + 8, meta.len() as u32);
                set_ret(buf, 0);
            }
            _ => {
                set_ret(buf, -1);
                set_error(buf, libc::EIO);
            }
        }
        Ok(())
    }

    fn access_work(&self, buf: &mut [u8], header: &Header) -> Result<()> {
        let mode = read_i32(buf, HEADER_LEN);
        let path = match self.resolve(buf, header, HEADER_LEN + 4) {
            Ok(p) => p,
            Err(_) => {
                set_ret(buf, -1);
                return Ok(());
            }
        };
        match check_access(&path, mode) {
            Ok(()) => set_ret(buf, 0),
            Err(e) => {
                set_ret(buf, -1);
                set_error(buf, e.raw_os_error().unwrap_or(libc::ENOENT));
            }
        }
        Ok(())
    }

    fn fsync_work(&self, buf: &mut [u8]) -> Result<()> {
        let fd = read_i32(buf, HEADER_LEN);
        if fd == 0 {
            set_ret(buf, -1);
            set_error(buf, libc::EBADF);
            return Ok(());
        }
        let mut files = self.open_files.lock();
        let Some(file) = files.get_mut(&fd) else {
            set_ret(buf, -1);
            set_error(buf, libc::EBADF);
            return Ok(());
        };
        match file.flush().and_then(|()| file.sync_all()) {
            Ok(()) => set_ret(buf, 0),
            Err(e) => {
                set_ret(buf, -1);
                set_error(buf, e.raw_os_error().unwrap_or(libc::EIO));
            }
        }
        Ok(())
    }

    fn cp_work(&self, buf: &mut [u8], header: &Header) -> Result<()> {
        let from_len = read_u32(buf, HEADER_LEN) as usize;
        let from_name = read_name(buf, HEADER_LEN)?;
        let to_name = read_name(buf, HEADER_LEN + 4 + from_len)?;

        let from = paths::resolve_path(&from_name, header.user_id, &self.roots);
        let to = paths::resolve_path(&to_name, header.user_id, &self.roots);
        match (from, to) {
            (Ok(from), Ok(to)) => match copy_file(&from, &to) {
                Ok(()) => set_ret(buf, 0),
                Err(e) => {
                    set_ret(buf, -1);
                    set_error(buf, e.raw_os_error().unwrap_or(libc::EIO));
                }
            },
            _ => set_ret(buf, -1),
        }
        Ok(())
    }

    fn disk_usage_work(&self, buf: &mut [u8]) -> Result<()> {
        // statfs is left to the surrounding OS image; this host doesn't
        // assume any particular filesystem is mounted for the storage
        // roots, so the two quotas are reported as unknown (0) rather
        // than guessed at.
        set_ret(buf, 0);
        write_u32(buf, HEADER_LEN, 0);
        write_u32(buf, HEADER_LEN + 4, 0);
        Ok(())
    }

    fn delete_all_work(&self, buf: &mut [u8], header: &Header) -> Result<()> {
        let path = match self.resolve(buf, header, HEADER_LEN) {
            Ok(p) => p,
            Err(_) => {
                set_ret(buf, -1);
                return Ok(());
            }
        };
        match remove_recursive(&path) {
            Ok(()) => set_ret(buf, 0),
            Err(e) => {
                set_ret(buf, -1);
                set_error(buf, e.raw_os_error().unwrap_or(libc::EIO));
            }
        }
        Ok(())
    }
}

fn remove_recursive(path: &std::path::Path) -> std::io::Result<()> {
    let meta = std::fs::symlink_metadata(path)?;
    if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

fn check_access(path: &std::path::Path, mode: i32) -> std::io::Result<()> {
    let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|_| std::io::Error::from_raw_os_error(libc::EINVAL))?;
    // SAFETY: `c_path` is a valid NUL-terminated buffer for the duration of
    // the call.
    let rc = unsafe { libc::access(c_path.as_ptr(), mode) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

fn copy_file(from: &std::path::Path, to: &std::path::Path) -> std::io::Result<()> {
    paths::ensure_parent_dir(to)?;
    std::fs::copy(from, to)?;
    let file = File::open(to)?;
    file.sync_all()
}

fn raise_file_limit() {
    let limit = libc::rlimit { rlim_cur: FILE_NUM_LIMIT_MAX, rlim_max: FILE_NUM_LIMIT_MAX };
    // SAFETY: `limit` is a plain value struct; setrlimit only reads it.
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) };
    if rc != 0 {
        tracing::warn!(errno = std::io::Error::last_os_error().raw_os_error(), "failed to raise RLIMIT_NOFILE");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_request(name: &str, mode: &str, user_id: u32, cmd: FsCmd) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + 8 + name.len()];
        write_u32(&mut buf, 0, cmd as u32);
        write_u32(&mut buf, 12, user_id);
        let mode_bytes = mode.as_bytes();
        buf[HEADER_LEN..HEADER_LEN + mode_bytes.len()].copy_from_slice(mode_bytes);
        write_u32(&mut buf, HEADER_LEN + 4, name.len() as u32);
        buf[HEADER_LEN + 8..HEADER_LEN + 8 + name.len()].copy_from_slice(name.as_bytes());
        buf
    }

    fn sandboxed_agent(tmp: &tempfile::TempDir) -> FsAgent {
        let roots = StorageRoots {
            transient: tmp.path().join("transient"),
            persistent: tmp.path().join("persistent"),
        };
        FsAgent::new(roots)
    }

    #[test]
    fn create_open_write_read_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let agent = sandboxed_agent(&tmp);
        // Route through the persistent prefix so paths::resolve_path lands
        // this file under the sandboxed persistent root.
        let mut buf = open_request("var/itrustee/sec_storage_data/hello.txt", "w+", 0, FsCmd::Create);
        agent.dispatch(&mut buf);
        let fd = read_i32(&buf, 4);
        assert!(fd >= 0, "expected a valid fd, got {fd}");

        let mut write_buf = vec![0u8; HEADER_LEN + 8 + 5];
        write_u32(&mut write_buf, 0, FsCmd::Write as u32);
        write_i32(&mut write_buf, HEADER_LEN, fd);
        write_u32(&mut write_buf, HEADER_LEN + 4, 5);
        write_buf[HEADER_LEN + 8..HEADER_LEN + 13].copy_from_slice(b"howdy");
        agent.dispatch(&mut write_buf);
        assert_eq!(read_i32(&write_buf, 4), 5);

        let mut seek_buf = vec![0u8; HEADER_LEN + 12];
        write_u32(&mut seek_buf, 0, FsCmd::Seek as u32);
        write_i32(&mut seek_buf, HEADER_LEN, fd);
        write_i32(&mut seek_buf, HEADER_LEN + 4, 0);
        write_u32(&mut seek_buf, HEADER_LEN + 8, 0);
        agent.dispatch(&mut seek_buf);
        assert_eq!(read_i32(&seek_buf, 4), 0);

        let mut read_buf = vec![0u8; HEADER_LEN + 8 + 5];
        write_u32(&mut read_buf, 0, FsCmd::Read as u32);
        write_i32(&mut read_buf, HEADER_LEN, fd);
        write_u32(&mut read_buf, HEADER_LEN + 4, 5);
        agent.dispatch(&mut read_buf);
        assert_eq!(read_i32(&read_buf, 4), 5);
        assert_eq!(&read_buf[HEADER_LEN + 8..HEADER_LEN + 13], b"howdy");
    }

    #[test]
    fn close_on_an_unknown_fd_reports_ebadf() {
        let tmp = tempfile::tempdir().unwrap();
        let agent = sandboxed_agent(&tmp);
        let mut buf = vec![0u8; HEADER_LEN + 4];
        write_u32(&mut buf, 0, FsCmd::Close as u32);
        write_i32(&mut buf, HEADER_LEN, 999);
        agent.dispatch(&mut buf);
        assert_eq!(read_i32(&buf, 4), -1);
    }

    #[test]
    fn opening_a_missing_file_without_create_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let agent = sandboxed_agent(&tmp);
        let mut buf = open_request("var/itrustee/sec_storage_data/nope.txt", "r\0\0\0", 0, FsCmd::Open);
        agent.dispatch(&mut buf);
        assert_eq!(read_i32(&buf, 4), -1);
    }

    #[test]
    fn rename_moves_a_file_between_resolved_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let agent = sandboxed_agent(&tmp);

        let mut create_buf = open_request("var/itrustee/sec_storage_data/a.txt", "w+\0", 0, FsCmd::Create);
        agent.dispatch(&mut create_buf);
        let fd = read_i32(&create_buf, 4);
        assert!(fd >= 0);
        let mut close_buf = vec![0u8; HEADER_LEN + 4];
        write_u32(&mut close_buf, 0, FsCmd::Close as u32);
        write_i32(&mut close_buf, HEADER_LEN, fd);
        agent.dispatch(&mut close_buf);

        let old_name = b"var/itrustee/sec_storage_data/a.txt";
        let new_name = b"var/itrustee/sec_storage_data/b.txt";
        let mut rename_buf = vec![0u8; HEADER_LEN + 8 + old_name.len() + new_name.len()];
        write_u32(&mut rename_buf, 0, FsCmd::Rename as u32);
        write_u32(&mut rename_buf, HEADER_LEN, old_name.len() as u32);
        write_u32(&mut rename_buf, HEADER_LEN + 4, new_name.len() as u32);
        rename_buf[HEADER_LEN + 8..HEADER_LEN + 8 + old_name.len()].copy_from_slice(old_name);
        rename_buf[HEADER_LEN + 8 + old_name.len()..HEADER_LEN + 8 + old_name.len() + new_name.len()]
            .copy_from_slice(new_name);
        agent.dispatch(&mut rename_buf);
        assert_eq!(read_i32(&rename_buf, 4), 0);

        let new_path = tmp.path().join("persistent/var/itrustee/sec_storage_data/b.txt");
        assert!(new_path.exists());
    }
}
