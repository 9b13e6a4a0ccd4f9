//! Everything that is neither file- nor socket-relative:
//! epoll/eventfd/select/poll, the ioctl escape hatch, `getrlimit`, and
//! the pkg staging calls (`POSIX_CALL_OTHER`, spec §4.I, §4.J).
//!
//! Grounded on `posix_proxy/src/posix_other.c`. Per Design Note §9, raw
//! `ioctl` is no longer passed straight through: only request codes on a
//! host-owned allowlist are executed, everything else is rejected with
//! [`ProxyError::IoctlNotWhitelisted`] rather than silently forwarded
//! to an arbitrary fd.

use crate::context::ProxyContext;
use crate::dispatch::{FuncEntry, PosixReply};
use crate::serialize::{OutArg, PosixArg};

fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}

fn reply_from_ret(ret: libc::c_long) -> PosixReply {
    if ret < 0 {
        PosixReply::err(errno())
    } else {
        PosixReply::ok(ret as i64)
    }
}

fn epoll_create1_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let Ok(flags) = args[0].as_i64(0) else { return PosixReply::err(libc::EINVAL) };
    reply_from_ret(unsafe { libc::epoll_create1(flags as libc::c_int) } as libc::c_long)
}

fn epoll_ctl_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(epfd), Ok(op), Ok(fd), Ok(event_bytes)) =
        (args[0].as_i64(0), args[1].as_i64(1), args[2].as_i64(2), args[3].as_ptr(3))
    else {
        return PosixReply::err(libc::EINVAL);
    };
    if event_bytes.len() < std::mem::size_of::<libc::epoll_event>() {
        return PosixReply::err(libc::EINVAL);
    }
    let mut event: libc::epoll_event = unsafe { std::mem::zeroed() };
    unsafe {
        std::ptr::copy_nonoverlapping(
            event_bytes.as_ptr(),
            &mut event as *mut _ as *mut u8,
            std::mem::size_of::<libc::epoll_event>(),
        );
    }
    let ret = unsafe { libc::epoll_ctl(epfd as libc::c_int, op as libc::c_int, fd as libc::c_int, &mut event) };
    reply_from_ret(ret as libc::c_long)
}

fn epoll_pwait_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(epfd), Ok(max_events), Ok(timeout)) =
        (args[0].as_i64(0), args[1].as_i64(1), args[2].as_i64(2))
    else {
        return PosixReply::err(libc::EINVAL);
    };
    let mut events = vec![unsafe { std::mem::zeroed::<libc::epoll_event>() }; max_events.max(0) as usize];
    let ret = unsafe {
        libc::epoll_wait(epfd as libc::c_int, events.as_mut_ptr(), events.len() as libc::c_int, timeout as libc::c_int)
    };
    if ret < 0 {
        return PosixReply::err(errno());
    }
    events.truncate(ret as usize);
    let bytes = events
        .iter()
        .flat_map(|e| unsafe {
            std::slice::from_raw_parts(e as *const _ as *const u8, std::mem::size_of::<libc::epoll_event>())
        })
        .copied()
        .collect();
    PosixReply { ret: ret as i64, errno: 0, out: vec![OutArg::Ptr(bytes)] }
}

fn eventfd_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(initval), Ok(flags)) = (args[0].as_i64(0), args[1].as_i64(1)) else {
        return PosixReply::err(libc::EINVAL);
    };
    reply_from_ret(unsafe { libc::eventfd(initval as libc::c_uint, flags as libc::c_int) } as libc::c_long)
}

/// Load one `fd_set` arg: an empty buffer means the original call passed
/// `NULL` for that set, anything else must be exactly one `fd_set`.
fn load_fd_set(bytes: &[u8]) -> Option<libc::fd_set> {
    let fd_set_sz = std::mem::size_of::<libc::fd_set>();
    if bytes.is_empty() || bytes.len() != fd_set_sz {
        return None;
    }
    let mut set: libc::fd_set = unsafe { std::mem::zeroed() };
    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), &mut set as *mut _ as *mut u8, fd_set_sz) };
    Some(set)
}

/// Dump an `fd_set` back to wire bytes, or an empty buffer if it was
/// never present (mirrors the `NULL` convention of [`load_fd_set`]).
fn dump_fd_set(set: &Option<libc::fd_set>) -> Vec<u8> {
    match set {
        None => Vec::new(),
        Some(s) => {
            unsafe { std::slice::from_raw_parts(s as *const _ as *const u8, std::mem::size_of::<libc::fd_set>()) }
                .to_vec()
        }
    }
}

fn select_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(nfds), Ok(timeout_us), Ok(read_bytes), Ok(write_bytes), Ok(except_bytes)) = (
        args[0].as_i64(0),
        args[1].as_i64(1),
        args[2].as_ptr(2),
        args[3].as_ptr(3),
        args[4].as_ptr(4),
    ) else {
        return PosixReply::err(libc::EINVAL);
    };
    let fd_set_sz = std::mem::size_of::<libc::fd_set>();
    if (!read_bytes.is_empty() && read_bytes.len() != fd_set_sz)
        || (!write_bytes.is_empty() && write_bytes.len() != fd_set_sz)
        || (!except_bytes.is_empty() && except_bytes.len() != fd_set_sz)
    {
        return PosixReply::err(libc::EINVAL);
    }

    let mut read_set = load_fd_set(read_bytes);
    let mut write_set = load_fd_set(write_bytes);
    let mut except_set = load_fd_set(except_bytes);
    let mut tv = libc::timeval { tv_sec: timeout_us / 1_000_000, tv_usec: (timeout_us % 1_000_000) as libc::suseconds_t };

    let read_ptr = read_set.as_mut().map_or(std::ptr::null_mut(), |s| s as *mut _);
    let write_ptr = write_set.as_mut().map_or(std::ptr::null_mut(), |s| s as *mut _);
    let except_ptr = except_set.as_mut().map_or(std::ptr::null_mut(), |s| s as *mut _);

    let ret = unsafe { libc::select(nfds as libc::c_int, read_ptr, write_ptr, except_ptr, &mut tv) };
    if ret < 0 {
        return PosixReply::err(errno());
    }

    PosixReply {
        ret: ret as i64,
        errno: 0,
        out: vec![
            OutArg::Ptr(dump_fd_set(&read_set)),
            OutArg::Ptr(dump_fd_set(&write_set)),
            OutArg::Ptr(dump_fd_set(&except_set)),
        ],
    }
}

fn pkg_send_work(ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(tee_index), Ok(total_len), Ok(data), Ok(offset), Ok(blk_sz)) = (
        args[0].as_i64(0),
        args[1].as_i64(1),
        args[2].as_i64(2),
        args[3].as_ptr(3),
        args[4].as_i64(4),
        args[5].as_i64(5),
    ) else {
        return PosixReply::err(libc::EINVAL);
    };

    if offset == 0 {
        if ctx.pkgs.put_pkg(fd as i32, tee_index as u64, vec![0u8; total_len.max(0) as usize]).is_err() {
            return PosixReply::err(libc::EIO);
        }
        if ctx.pkgs.write_at(fd as i32, tee_index as u64, 0, &data[..blk_sz.max(0) as usize]).is_err() {
            return PosixReply::err(libc::EINVAL);
        }
        return PosixReply::ok(blk_sz);
    }

    match ctx.pkgs.write_at(fd as i32, tee_index as u64, offset as usize, &data[..blk_sz.max(0) as usize]) {
        Ok(()) => PosixReply::ok(blk_sz),
        Err(crate::error::ProxyError::PkgNotFound { .. }) => PosixReply::err(libc::ENOENT),
        Err(_) => PosixReply::err(libc::ERANGE),
    }
}

fn pkg_recv_work(ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(tee_index), Ok(_total_len), Ok(offset), Ok(blk_sz)) = (
        args[0].as_i64(0),
        args[1].as_i64(1),
        args[2].as_i64(2),
        args[3].as_i64(3),
        args[4].as_i64(4),
    ) else {
        return PosixReply::err(libc::EINVAL);
    };
    match ctx.pkgs.read_at(fd as i32, tee_index as u64, offset.max(0) as usize, blk_sz.max(0) as usize) {
        Ok(buf) => PosixReply { ret: blk_sz, errno: 0, out: vec![OutArg::Ptr(buf)] },
        Err(crate::error::ProxyError::PkgNotFound { .. }) => PosixReply::err(libc::ENOENT),
        Err(_) => PosixReply::err(libc::EINVAL),
    }
}

fn pkg_terminate_work(ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(tee_index)) = (args[0].as_i64(0), args[1].as_i64(1)) else {
        return PosixReply::err(libc::EINVAL);
    };
    match ctx.pkgs.release_pkg_by_index(fd as i32, tee_index as u64) {
        Ok(freed) => PosixReply::ok(if freed { 1 } else { 0 }),
        Err(_) => PosixReply::err(libc::EIO),
    }
}

/// Request codes this host will forward through `ioctl`. Extend
/// deliberately; an unlisted code is rejected rather than passed
/// through.
const IOCTL_ALLOWLIST: &[u64] = &[
    libc::FIONREAD as u64,
    libc::FIONBIO as u64,
    libc::SIOCGIFFLAGS as u64,
    libc::SIOCGIFADDR as u64,
];

fn ioctl_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(req), Ok(buf)) = (args[0].as_i64(0), args[1].as_i64(1), args[2].as_ptr(2)) else {
        return PosixReply::err(libc::EINVAL);
    };
    if !IOCTL_ALLOWLIST.contains(&(req as u64)) {
        return PosixReply::err(libc::EPERM);
    }
    let mut local = buf.to_vec();
    let ret = unsafe { libc::ioctl(fd as libc::c_int, req as libc::c_ulong, local.as_mut_ptr()) };
    if ret < 0 {
        return PosixReply::err(errno());
    }
    PosixReply { ret: ret as i64, errno: 0, out: vec![OutArg::Ptr(local)] }
}

fn poll_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fds_bytes), Ok(nfds), Ok(timeout)) = (args[0].as_ptr(0), args[1].as_i64(1), args[2].as_i64(2)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let entry_sz = std::mem::size_of::<libc::pollfd>();
    if fds_bytes.len() < nfds.max(0) as usize * entry_sz {
        return PosixReply::err(libc::EINVAL);
    }
    let mut fds = vec![unsafe { std::mem::zeroed::<libc::pollfd>() }; nfds.max(0) as usize];
    unsafe {
        std::ptr::copy_nonoverlapping(fds_bytes.as_ptr(), fds.as_mut_ptr() as *mut u8, fds_bytes.len().min(fds.len() * entry_sz));
    }
    let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout as libc::c_int) };
    if ret < 0 {
        return PosixReply::err(errno());
    }
    let bytes = fds
        .iter()
        .flat_map(|f| unsafe { std::slice::from_raw_parts(f as *const _ as *const u8, entry_sz) })
        .copied()
        .collect();
    PosixReply { ret: ret as i64, errno: 0, out: vec![OutArg::Ptr(bytes)] }
}

fn getrlimit_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let Ok(resource) = args[0].as_i64(0) else { return PosixReply::err(libc::EINVAL) };
    let mut limit: libc::rlimit = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::getrlimit(resource as libc::c_int, &mut limit) };
    if ret < 0 {
        return PosixReply::err(errno());
    }
    let bytes = unsafe {
        std::slice::from_raw_parts(&limit as *const _ as *const u8, std::mem::size_of::<libc::rlimit>())
    }
    .to_vec();
    PosixReply { ret: 0, errno: 0, out: vec![OutArg::Ptr(bytes)] }
}

macro_rules! entry {
    ($arity:expr, $f:expr) => {
        FuncEntry { arity: $arity, handler: $f }
    };
}

/// `enum OtherPosixCallFns` verbatim: index `0` is
/// `OTHER_PLACE_HOLDER`, `OTHER_EPOLL_CREATE1=1` through
/// `OTHER_GETRLIMIT=11`.
pub fn table() -> Vec<FuncEntry> {
    vec![
        entry!(0, |_ctx, _a| PosixReply::err(libc::ENOSYS)), // 0: OTHER_PLACE_HOLDER
        entry!(1, epoll_create1_work),                       // 1: OTHER_EPOLL_CREATE1
        entry!(4, epoll_ctl_work),                           // 2: OTHER_EPOLL_CTL
        entry!(3, epoll_pwait_work),                         // 3: OTHER_EPOLL_PWAIT
        entry!(2, eventfd_work),                             // 4: OTHER_EVENTFD
        entry!(5, select_work),                              // 5: OTHER_SELECT
        entry!(6, pkg_send_work),                            // 6: OTHER_PKG_SEND
        entry!(5, pkg_recv_work),                             // 7: OTHER_PKG_RECV
        entry!(2, pkg_terminate_work),                       // 8: OTHER_PKG_TERMINATE
        entry!(4, ioctl_work),                               // 9: OTHER_IOCTL
        entry!(3, poll_work),                                // 10: OTHER_POLL
        entry!(1, getrlimit_work),                           // 11: OTHER_GETRLIMIT
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ProxyContext {
        ProxyContext::new(-1, -1)
    }

    #[test]
    fn pkg_send_first_chunk_then_recv_round_trips() {
        let ctx = ctx();
        let table = table();
        let payload = b"0123456789".to_vec();

        let send_reply = (table[6].handler)(
            &ctx,
            &[
                PosixArg::I64(5),
                PosixArg::I64(1),
                PosixArg::I64(10),
                PosixArg::Ptr(&payload),
                PosixArg::I64(0),
                PosixArg::I64(10),
            ],
        );
        assert_eq!(send_reply.ret, 10);

        let recv_reply = (table[7].handler)(
            &ctx,
            &[PosixArg::I64(5), PosixArg::I64(1), PosixArg::I64(10), PosixArg::I64(0), PosixArg::I64(10)],
        );
        assert_eq!(recv_reply.out, vec![OutArg::Ptr(payload)]);
    }

    #[test]
    fn pkg_recv_on_an_unknown_key_reports_enoent() {
        let reply = (table()[7].handler)(
            &ctx(),
            &[PosixArg::I64(1), PosixArg::I64(1), PosixArg::I64(4), PosixArg::I64(0), PosixArg::I64(4)],
        );
        assert_eq!(reply.errno, libc::ENOENT);
    }

    #[test]
    fn ioctl_rejects_a_request_code_outside_the_allowlist() {
        let buf = vec![0u8; 4];
        let reply = (table()[9].handler)(
            &ctx(),
            &[PosixArg::I64(0), PosixArg::I64(0x1234_5678), PosixArg::Ptr(&buf), PosixArg::I64(4)],
        );
        assert_eq!(reply.errno, libc::EPERM);
    }

    #[test]
    fn eventfd_creates_a_usable_fd() {
        let reply = (table()[4].handler)(&ctx(), &[PosixArg::I64(0), PosixArg::I64(0)]);
        assert_eq!(reply.errno, 0);
        unsafe { libc::close(reply.ret as i32) };
    }

    #[test]
    fn select_observes_a_ready_eventfd() {
        let fd = unsafe { libc::eventfd(0, 0) };
        assert!(fd >= 0);
        let one = 1u64.to_ne_bytes();
        assert_eq!(unsafe { libc::write(fd, one.as_ptr() as *const libc::c_void, 8) }, 8);

        let mut read_set: libc::fd_set = unsafe { std::mem::zeroed() };
        unsafe {
            libc::FD_ZERO(&mut read_set);
            libc::FD_SET(fd, &mut read_set);
        }
        let read_bytes = unsafe {
            std::slice::from_raw_parts(&read_set as *const _ as *const u8, std::mem::size_of::<libc::fd_set>())
        }
        .to_vec();

        let reply = (table()[5].handler)(
            &ctx(),
            &[
                PosixArg::I64((fd + 1) as i64),
                PosixArg::I64(0),
                PosixArg::Ptr(&read_bytes),
                PosixArg::Ptr(&[]),
                PosixArg::Ptr(&[]),
            ],
        );
        assert_eq!(reply.ret, 1);
        let OutArg::Ptr(out_bytes) = &reply.out[0] else { panic!("expected Ptr out-arg") };
        let mut out_set: libc::fd_set = unsafe { std::mem::zeroed() };
        unsafe {
            std::ptr::copy_nonoverlapping(out_bytes.as_ptr(), &mut out_set as *mut _ as *mut u8, out_bytes.len());
            assert!(libc::FD_ISSET(fd, &out_set));
            libc::close(fd);
        }
    }

    #[test]
    fn select_rejects_a_malformed_fd_set_length() {
        let reply = (table()[5].handler)(
            &ctx(),
            &[
                PosixArg::I64(1),
                PosixArg::I64(0),
                PosixArg::Ptr(&[0u8; 3]),
                PosixArg::Ptr(&[]),
                PosixArg::Ptr(&[]),
            ],
        );
        assert_eq!(reply.errno, libc::EINVAL);
    }
}
