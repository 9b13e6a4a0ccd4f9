//! File-relative POSIX calls (`POSIX_CALL_FILE`, spec §4.I).
//!
//! Grounded on `posix_proxy/src/posix_file.c`: each `FileXWork` function
//! there deserializes its fixed argument list and calls straight through
//! to the matching libc function, returning `-1`/`errno` on failure. The
//! table below mirrors `enum file_posix_call_fns` verbatim — index `0`
//! is the unused placeholder, `FILE_OPEN = 1` through `FILE_REALPATH =
//! 40` follow in the original's order — so a function index is
//! validated against this table's length rather than a separate bounds
//! constant.

use std::ffi::CString;

use crate::context::ProxyContext;
use crate::dispatch::{FuncEntry, PosixReply};
use crate::serialize::{OutArg, PosixArg};

fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}

fn cstring_from(buf: &[u8]) -> Option<CString> {
    let end = buf.iter().position(|&b| b == 0)?;
    CString::new(&buf[..end]).ok()
}

fn reply_from_ret(ret: libc::c_long) -> PosixReply {
    if ret < 0 {
        PosixReply::err(errno())
    } else {
        PosixReply::ok(ret as i64)
    }
}

fn open_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(path), Ok(flags), Ok(mode)) = (args[0].as_ptr(0), args[1].as_i64(1), args[2].as_i64(2)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let Some(path) = cstring_from(path) else { return PosixReply::err(libc::EINVAL) };
    let ret = unsafe { libc::open(path.as_ptr(), flags as libc::c_int, mode as libc::mode_t) };
    reply_from_ret(ret as libc::c_long)
}

fn openat_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(path), Ok(flags), Ok(mode)) =
        (args[0].as_i64(0), args[1].as_ptr(1), args[2].as_i64(2), args[3].as_i64(3))
    else {
        return PosixReply::err(libc::EINVAL);
    };
    let Some(path) = cstring_from(path) else { return PosixReply::err(libc::EINVAL) };
    let ret = unsafe { libc::openat(fd as libc::c_int, path.as_ptr(), flags as libc::c_int, mode as libc::mode_t) };
    reply_from_ret(ret as libc::c_long)
}

fn read_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(count)) = (args[0].as_i64(0), args[1].as_i64(1)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let mut buf = vec![0u8; count.max(0) as usize];
    let ret = unsafe { libc::read(fd as libc::c_int, buf.as_mut_ptr() as *mut _, buf.len()) };
    if ret < 0 {
        return PosixReply::err(errno());
    }
    buf.truncate(ret as usize);
    PosixReply { ret: ret as i64, errno: 0, out: vec![OutArg::Ptr(buf)] }
}

fn write_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(buf)) = (args[0].as_i64(0), args[1].as_ptr(1)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let ret = unsafe { libc::write(fd as libc::c_int, buf.as_ptr() as *const _, buf.len()) };
    reply_from_ret(ret as libc::c_long)
}

fn close_work(ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let Ok(fd) = args[0].as_i64(0) else { return PosixReply::err(libc::EINVAL) };
    if ctx.check_not_reserved(fd as i32).is_err() {
        return PosixReply::err(libc::EBADF);
    }
    reply_from_ret(unsafe { libc::close(fd as libc::c_int) } as libc::c_long)
}

fn access_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(path), Ok(mode)) = (args[0].as_ptr(0), args[1].as_i64(1)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let Some(path) = cstring_from(path) else { return PosixReply::err(libc::EINVAL) };
    reply_from_ret(unsafe { libc::access(path.as_ptr(), mode as libc::c_int) } as libc::c_long)
}

fn faccessat_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(path), Ok(mode), Ok(flag)) =
        (args[0].as_i64(0), args[1].as_ptr(1), args[2].as_i64(2), args[3].as_i64(3))
    else {
        return PosixReply::err(libc::EINVAL);
    };
    let Some(path) = cstring_from(path) else { return PosixReply::err(libc::EINVAL) };
    let ret = unsafe {
        libc::faccessat(fd as libc::c_int, path.as_ptr(), mode as libc::c_int, flag as libc::c_int)
    };
    reply_from_ret(ret as libc::c_long)
}

fn lseek_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(offset), Ok(whence)) = (args[0].as_i64(0), args[1].as_i64(1), args[2].as_i64(2)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let ret = unsafe { libc::lseek(fd as libc::c_int, offset as libc::off_t, whence as libc::c_int) };
    reply_from_ret(ret as libc::c_long)
}

fn chdir_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let Ok(path) = args[0].as_ptr(0) else { return PosixReply::err(libc::EINVAL) };
    let Some(path) = cstring_from(path) else { return PosixReply::err(libc::EINVAL) };
    reply_from_ret(unsafe { libc::chdir(path.as_ptr()) } as libc::c_long)
}

fn fchdir_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let Ok(fd) = args[0].as_i64(0) else { return PosixReply::err(libc::EINVAL) };
    reply_from_ret(unsafe { libc::fchdir(fd as libc::c_int) } as libc::c_long)
}

fn chmod_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(path), Ok(mode)) = (args[0].as_ptr(0), args[1].as_i64(1)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let Some(path) = cstring_from(path) else { return PosixReply::err(libc::EINVAL) };
    reply_from_ret(unsafe { libc::chmod(path.as_ptr(), mode as libc::mode_t) } as libc::c_long)
}

fn fchmod_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(mode)) = (args[0].as_i64(0), args[1].as_i64(1)) else {
        return PosixReply::err(libc::EINVAL);
    };
    reply_from_ret(unsafe { libc::fchmod(fd as libc::c_int, mode as libc::mode_t) } as libc::c_long)
}

fn fchmodat_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(path), Ok(mode), Ok(flag)) =
        (args[0].as_i64(0), args[1].as_ptr(1), args[2].as_i64(2), args[3].as_i64(3))
    else {
        return PosixReply::err(libc::EINVAL);
    };
    let Some(path) = cstring_from(path) else { return PosixReply::err(libc::EINVAL) };
    let ret = unsafe {
        libc::fchmodat(fd as libc::c_int, path.as_ptr(), mode as libc::mode_t, flag as libc::c_int)
    };
    reply_from_ret(ret as libc::c_long)
}

fn stat_reply(ret: libc::c_int, st: libc::stat) -> PosixReply {
    if ret < 0 {
        return PosixReply::err(errno());
    }
    let bytes = unsafe {
        std::slice::from_raw_parts(&st as *const _ as *const u8, std::mem::size_of::<libc::stat>())
    }
    .to_vec();
    PosixReply { ret: 0, errno: 0, out: vec![OutArg::Ptr(bytes)] }
}

fn stat_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let Ok(path) = args[0].as_ptr(0) else { return PosixReply::err(libc::EINVAL) };
    let Some(path) = cstring_from(path) else { return PosixReply::err(libc::EINVAL) };
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::stat(path.as_ptr(), &mut st) };
    stat_reply(ret, st)
}

fn fstat_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let Ok(fd) = args[0].as_i64(0) else { return PosixReply::err(libc::EINVAL) };
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::fstat(fd as libc::c_int, &mut st) };
    stat_reply(ret, st)
}

fn statfs_reply(ret: libc::c_int, sf: libc::statfs) -> PosixReply {
    if ret < 0 {
        return PosixReply::err(errno());
    }
    let bytes = unsafe {
        std::slice::from_raw_parts(&sf as *const _ as *const u8, std::mem::size_of::<libc::statfs>())
    }
    .to_vec();
    PosixReply { ret: 0, errno: 0, out: vec![OutArg::Ptr(bytes)] }
}

fn statfs_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let Ok(path) = args[0].as_ptr(0) else { return PosixReply::err(libc::EINVAL) };
    let Some(path) = cstring_from(path) else { return PosixReply::err(libc::EINVAL) };
    let mut sf: libc::statfs = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::statfs(path.as_ptr(), &mut sf) };
    statfs_reply(ret, sf)
}

fn fstatfs_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let Ok(fd) = args[0].as_i64(0) else { return PosixReply::err(libc::EINVAL) };
    let mut sf: libc::statfs = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::fstatfs(fd as libc::c_int, &mut sf) };
    statfs_reply(ret, sf)
}

fn lstat_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let Ok(path) = args[0].as_ptr(0) else { return PosixReply::err(libc::EINVAL) };
    let Some(path) = cstring_from(path) else { return PosixReply::err(libc::EINVAL) };
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::lstat(path.as_ptr(), &mut st) };
    stat_reply(ret, st)
}

fn fstatat_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(path), Ok(flag)) = (args[0].as_i64(0), args[1].as_ptr(1), args[2].as_i64(2)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let Some(path) = cstring_from(path) else { return PosixReply::err(libc::EINVAL) };
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::fstatat(fd as libc::c_int, path.as_ptr(), &mut st, flag as libc::c_int) };
    stat_reply(ret, st)
}

fn symlink_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(target), Ok(linkpath)) = (args[0].as_ptr(0), args[1].as_ptr(1)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let (Some(target), Some(linkpath)) = (cstring_from(target), cstring_from(linkpath)) else {
        return PosixReply::err(libc::EINVAL);
    };
    reply_from_ret(unsafe { libc::symlink(target.as_ptr(), linkpath.as_ptr()) } as libc::c_long)
}

fn symlinkat_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(target), Ok(fd), Ok(linkpath)) = (args[0].as_ptr(0), args[1].as_i64(1), args[2].as_ptr(2)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let (Some(target), Some(linkpath)) = (cstring_from(target), cstring_from(linkpath)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let ret = unsafe { libc::symlinkat(target.as_ptr(), fd as libc::c_int, linkpath.as_ptr()) };
    reply_from_ret(ret as libc::c_long)
}

fn readlink_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(path), Ok(bufsz)) = (args[0].as_ptr(0), args[1].as_i64(1)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let Some(path) = cstring_from(path) else { return PosixReply::err(libc::EINVAL) };
    let mut buf = vec![0u8; bufsz.max(0) as usize];
    let ret = unsafe { libc::readlink(path.as_ptr(), buf.as_mut_ptr() as *mut _, buf.len()) };
    if ret < 0 {
        return PosixReply::err(errno());
    }
    buf.truncate(ret as usize);
    PosixReply { ret: ret as i64, errno: 0, out: vec![OutArg::Ptr(buf)] }
}

fn readlinkat_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(path), Ok(bufsz)) = (args[0].as_i64(0), args[1].as_ptr(1), args[2].as_i64(2)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let Some(path) = cstring_from(path) else { return PosixReply::err(libc::EINVAL) };
    let mut buf = vec![0u8; bufsz.max(0) as usize];
    let ret =
        unsafe { libc::readlinkat(fd as libc::c_int, path.as_ptr(), buf.as_mut_ptr() as *mut _, buf.len()) };
    if ret < 0 {
        return PosixReply::err(errno());
    }
    buf.truncate(ret as usize);
    PosixReply { ret: ret as i64, errno: 0, out: vec![OutArg::Ptr(buf)] }
}

fn fsync_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let Ok(fd) = args[0].as_i64(0) else { return PosixReply::err(libc::EINVAL) };
    reply_from_ret(unsafe { libc::fsync(fd as libc::c_int) } as libc::c_long)
}

fn truncate_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(path), Ok(len)) = (args[0].as_ptr(0), args[1].as_i64(1)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let Some(path) = cstring_from(path) else { return PosixReply::err(libc::EINVAL) };
    reply_from_ret(unsafe { libc::truncate(path.as_ptr(), len as libc::off_t) } as libc::c_long)
}

fn ftruncate_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(len)) = (args[0].as_i64(0), args[1].as_i64(1)) else {
        return PosixReply::err(libc::EINVAL);
    };
    reply_from_ret(unsafe { libc::ftruncate(fd as libc::c_int, len as libc::off_t) } as libc::c_long)
}

fn rename_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(old), Ok(new)) = (args[0].as_ptr(0), args[1].as_ptr(1)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let (Some(old), Some(new)) = (cstring_from(old), cstring_from(new)) else {
        return PosixReply::err(libc::EINVAL);
    };
    reply_from_ret(unsafe { libc::rename(old.as_ptr(), new.as_ptr()) } as libc::c_long)
}

fn renameat_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(old_fd), Ok(old), Ok(new_fd), Ok(new)) =
        (args[0].as_i64(0), args[1].as_ptr(1), args[2].as_i64(2), args[3].as_ptr(3))
    else {
        return PosixReply::err(libc::EINVAL);
    };
    let (Some(old), Some(new)) = (cstring_from(old), cstring_from(new)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let ret = unsafe {
        libc::renameat(old_fd as libc::c_int, old.as_ptr(), new_fd as libc::c_int, new.as_ptr())
    };
    reply_from_ret(ret as libc::c_long)
}

fn dup2_work(ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(oldfd), Ok(newfd)) = (args[0].as_i64(0), args[1].as_i64(1)) else {
        return PosixReply::err(libc::EINVAL);
    };
    if ctx.check_not_reserved(oldfd as i32).is_err() || ctx.check_not_reserved(newfd as i32).is_err() {
        return PosixReply::err(libc::EBADF);
    }
    reply_from_ret(unsafe { libc::dup2(oldfd as libc::c_int, newfd as libc::c_int) } as libc::c_long)
}

fn mkdir_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(path), Ok(mode)) = (args[0].as_ptr(0), args[1].as_i64(1)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let Some(path) = cstring_from(path) else { return PosixReply::err(libc::EINVAL) };
    reply_from_ret(unsafe { libc::mkdir(path.as_ptr(), mode as libc::mode_t) } as libc::c_long)
}

fn umask_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let Ok(mask) = args[0].as_i64(0) else { return PosixReply::err(libc::EINVAL) };
    PosixReply::ok(unsafe { libc::umask(mask as libc::mode_t) } as i64)
}

fn unlink_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let Ok(path) = args[0].as_ptr(0) else { return PosixReply::err(libc::EINVAL) };
    let Some(path) = cstring_from(path) else { return PosixReply::err(libc::EINVAL) };
    reply_from_ret(unsafe { libc::unlink(path.as_ptr()) } as libc::c_long)
}

fn fcntl_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(cmd), Ok(arg)) = (args[0].as_i64(0), args[1].as_i64(1), args[2].as_i64(2)) else {
        return PosixReply::err(libc::EINVAL);
    };
    // F_GETLK/F_SETLK(W) carry a struct flock the caller expects copied
    // back; every other command here is the plain integer-arg form.
    if cmd as libc::c_int == libc::F_GETLK {
        let mut lock: libc::flock = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::fcntl(fd as libc::c_int, libc::F_GETLK, &mut lock as *mut _) };
        if ret < 0 {
            return PosixReply::err(errno());
        }
        let bytes = unsafe {
            std::slice::from_raw_parts(&lock as *const _ as *const u8, std::mem::size_of::<libc::flock>())
        }
        .to_vec();
        return PosixReply { ret: 0, errno: 0, out: vec![OutArg::Ptr(bytes)] };
    }
    reply_from_ret(unsafe { libc::fcntl(fd as libc::c_int, cmd as libc::c_int, arg as libc::c_int) } as libc::c_long)
}

fn mmap_util_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(len), Ok(prot), Ok(flags), Ok(fd), Ok(off)) =
        (args[0].as_i64(0), args[1].as_i64(1), args[2].as_i64(2), args[3].as_i64(3), args[4].as_i64(4))
    else {
        return PosixReply::err(libc::EINVAL);
    };
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len.max(0) as usize,
            prot as libc::c_int,
            flags as libc::c_int,
            fd as libc::c_int,
            off as libc::off_t,
        )
    };
    if addr == libc::MAP_FAILED {
        return PosixReply::err(errno());
    }
    PosixReply::ok(addr as i64)
}

fn msync_util_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(addr), Ok(len), Ok(flags)) = (args[0].as_i64(0), args[1].as_i64(1), args[2].as_i64(2)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let ret = unsafe { libc::msync(addr as *mut libc::c_void, len.max(0) as usize, flags as libc::c_int) };
    reply_from_ret(ret as libc::c_long)
}

fn sendfile_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(out_fd), Ok(in_fd), Ok(count)) = (args[0].as_i64(0), args[1].as_i64(1), args[2].as_i64(2)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let ret = unsafe {
        libc::sendfile(out_fd as libc::c_int, in_fd as libc::c_int, std::ptr::null_mut(), count.max(0) as usize)
    };
    reply_from_ret(ret as libc::c_long)
}

fn remove_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let Ok(path) = args[0].as_ptr(0) else { return PosixReply::err(libc::EINVAL) };
    let Some(path) = cstring_from(path) else { return PosixReply::err(libc::EINVAL) };
    reply_from_ret(unsafe { libc::remove(path.as_ptr()) } as libc::c_long)
}

fn rmdir_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let Ok(path) = args[0].as_ptr(0) else { return PosixReply::err(libc::EINVAL) };
    let Some(path) = cstring_from(path) else { return PosixReply::err(libc::EINVAL) };
    reply_from_ret(unsafe { libc::rmdir(path.as_ptr()) } as libc::c_long)
}

fn dup_work(ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let Ok(fd) = args[0].as_i64(0) else { return PosixReply::err(libc::EINVAL) };
    if ctx.check_not_reserved(fd as i32).is_err() {
        return PosixReply::err(libc::EBADF);
    }
    reply_from_ret(unsafe { libc::dup(fd as libc::c_int) } as libc::c_long)
}

fn realpath_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let Ok(path) = args[0].as_ptr(0) else { return PosixReply::err(libc::EINVAL) };
    let Some(path) = cstring_from(path) else { return PosixReply::err(libc::EINVAL) };
    let mut out = vec![0u8; libc::PATH_MAX as usize];
    let ret = unsafe { libc::realpath(path.as_ptr(), out.as_mut_ptr() as *mut libc::c_char) };
    if ret.is_null() {
        return PosixReply::err(errno());
    }
    let len = out.iter().position(|&b| b == 0).unwrap_or(out.len());
    out.truncate(len + 1);
    PosixReply { ret: 0, errno: 0, out: vec![OutArg::Ptr(out)] }
}

macro_rules! entry {
    ($arity:expr, $f:expr) => {
        FuncEntry { arity: $arity, handler: $f }
    };
}

/// `enum file_posix_call_fns` verbatim: index `0` unused, `FILE_OPEN=1`
/// through `FILE_REALPATH=40`.
pub fn table() -> Vec<FuncEntry> {
    vec![
        entry!(0, |_ctx, _a| PosixReply::err(libc::ENOSYS)), // 0: placeholder
        entry!(3, open_work),                                // 1: FILE_OPEN
        entry!(4, openat_work),                              // 2: FILE_OPENAT
        entry!(2, read_work),                                // 3: FILE_READ
        entry!(3, write_work),                                // 4: FILE_WRITE
        entry!(1, close_work),                                // 5: FILE_CLOSE
        entry!(2, access_work),                               // 6: FILE_ACCESS
        entry!(4, faccessat_work),                            // 7: FILE_FACCESSAT
        entry!(3, lseek_work),                                // 8: FILE_LSEEK
        entry!(1, chdir_work),                                // 9: FILE_CHDIR
        entry!(1, fchdir_work),                               // 10: FILE_FCHDIR
        entry!(2, chmod_work),                                // 11: FILE_CHMOD
        entry!(2, fchmod_work),                               // 12: FILE_FCHMOD
        entry!(4, fchmodat_work),                             // 13: FILE_FCHMODAT
        entry!(1, stat_work),                                 // 14: FILE_STAT
        entry!(1, fstat_work),                                // 15: FILE_FSTAT
        entry!(1, statfs_work),                               // 16: FILE_STATFS
        entry!(1, fstatfs_work),                              // 17: FILE_FSTATFS
        entry!(1, lstat_work),                                // 18: FILE_LSTAT
        entry!(3, fstatat_work),                              // 19: FILE_FSTATAT
        entry!(2, symlink_work),                              // 20: FILE_SYMLINK
        entry!(3, symlinkat_work),                            // 21: FILE_SYMLINKAT
        entry!(2, readlink_work),                             // 22: FILE_READLINK
        entry!(3, readlinkat_work),                           // 23: FILE_READLINKAT
        entry!(1, fsync_work),                                // 24: FILE_FSYNC
        entry!(2, truncate_work),                             // 25: FILE_TRUNCATE
        entry!(2, ftruncate_work),                            // 26: FILE_FTRUNCATE
        entry!(2, rename_work),                               // 27: FILE_RENAME
        entry!(4, renameat_work),                             // 28: FILE_RENAMEAT
        entry!(2, dup2_work),                                 // 29: FILE_DUP2
        entry!(2, mkdir_work),                                // 30: FILE_MKDIR
        entry!(1, umask_work),                                // 31: FILE_UMASK
        entry!(1, unlink_work),                               // 32: FILE_UNLINK
        entry!(3, fcntl_work),                                // 33: FILE_FCNTL
        entry!(5, mmap_util_work),                            // 34: FILE_MMAP_UTIL
        entry!(3, msync_util_work),                           // 35: FILE_MSYNC_UTIL
        entry!(3, sendfile_work),                             // 36: FILE_SENDFILE
        entry!(1, remove_work),                               // 37: FILE_REMOVE
        entry!(1, rmdir_work),                                // 38: FILE_RMDIR
        entry!(1, dup_work),                                  // 39: FILE_DUP
        entry!(1, realpath_work),                             // 40: FILE_REALPATH
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ctx() -> ProxyContext {
        ProxyContext::new(-100, -101)
    }

    fn path_arg(p: &std::path::Path) -> Vec<u8> {
        let mut bytes = p.to_str().unwrap().as_bytes().to_vec();
        bytes.push(0);
        bytes
    }

    #[test]
    fn open_write_read_close_round_trip_through_the_table() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("a.txt");
        let ctx = ctx();
        let table = table();

        let path_bytes = path_arg(&file_path);
        let open_reply = (table[1].handler)(
            &ctx,
            &[
                PosixArg::Ptr(&path_bytes),
                PosixArg::I64((libc::O_CREAT | libc::O_RDWR) as i64),
                PosixArg::I64(0o600),
            ],
        );
        assert_eq!(open_reply.errno, 0);
        let fd = open_reply.ret as i32;
        assert!(fd >= 0);

        let payload = b"hello".to_vec();
        let write_reply =
            (table[4].handler)(&ctx, &[PosixArg::I64(fd as i64), PosixArg::Ptr(&payload), PosixArg::I64(5)]);
        assert_eq!(write_reply.ret, 5);

        (table[8].handler)(&ctx, &[PosixArg::I64(fd as i64), PosixArg::I64(0), PosixArg::I64(libc::SEEK_SET as i64)]);

        let read_reply = (table[3].handler)(&ctx, &[PosixArg::I64(fd as i64), PosixArg::I64(5)]);
        assert_eq!(read_reply.ret, 5);
        assert_eq!(read_reply.out, vec![OutArg::Ptr(b"hello".to_vec())]);

        let close_reply = (table[5].handler)(&ctx, &[PosixArg::I64(fd as i64)]);
        assert_eq!(close_reply.errno, 0);
    }

    #[test]
    fn close_refuses_the_reserved_driver_fd() {
        let ctx = ProxyContext::new(42, -1);
        let reply = (table()[5].handler)(&ctx, &[PosixArg::I64(42)]);
        assert_eq!(reply.errno, libc::EBADF);
    }

    #[test]
    fn dup2_refuses_a_reserved_target_fd() {
        let ctx = ProxyContext::new(-1, 9);
        let reply = (table()[29].handler)(&ctx, &[PosixArg::I64(3), PosixArg::I64(9)]);
        assert_eq!(reply.errno, libc::EBADF);
    }

    #[test]
    fn dispatch_rejects_func_index_past_the_table() {
        use crate::dispatch::{dispatch, RequestKind};
        let err = dispatch(&ctx(), RequestKind::File, &table(), 41, &[]).unwrap_err();
        assert!(matches!(err, crate::error::ProxyError::UnknownFunction { func: 41, .. }));
    }
}
