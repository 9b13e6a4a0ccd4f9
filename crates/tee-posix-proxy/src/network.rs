//! Socket-relative POSIX calls (`POSIX_CALL_NETWORK`, spec §4.I).
//!
//! Grounded on `posix_proxy/src/posix_network.c`: each `NetXWork`
//! deserializes a raw `sockaddr` buffer and its length and calls
//! straight through to the matching libc socket call. The table mirrors
//! `enum NetworkPosixCallFns` verbatim, index `0` unused.

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

fn sockaddr_ptr(buf: &[u8]) -> *const libc::sockaddr {
    buf.as_ptr() as *const libc::sockaddr
}

fn socket_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(domain), Ok(ty), Ok(proto)) = (args[0].as_i64(0), args[1].as_i64(1), args[2].as_i64(2)) else {
        return PosixReply::err(libc::EINVAL);
    };
    reply_from_ret(unsafe { libc::socket(domain as libc::c_int, ty as libc::c_int, proto as libc::c_int) } as libc::c_long)
}

fn connect_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(addr), Ok(len)) = (args[0].as_i64(0), args[1].as_ptr(1), args[2].as_i64(2)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let ret = unsafe { libc::connect(fd as libc::c_int, sockaddr_ptr(addr), len as libc::socklen_t) };
    reply_from_ret(ret as libc::c_long)
}

fn bind_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(addr), Ok(len)) = (args[0].as_i64(0), args[1].as_ptr(1), args[2].as_i64(2)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let ret = unsafe { libc::bind(fd as libc::c_int, sockaddr_ptr(addr), len as libc::socklen_t) };
    reply_from_ret(ret as libc::c_long)
}

fn listen_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(backlog)) = (args[0].as_i64(0), args[1].as_i64(1)) else {
        return PosixReply::err(libc::EINVAL);
    };
    reply_from_ret(unsafe { libc::listen(fd as libc::c_int, backlog as libc::c_int) } as libc::c_long)
}

fn accept_common(fd: i64) -> PosixReply {
    let mut addr: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let ret = unsafe { libc::accept(fd as libc::c_int, &mut addr as *mut _ as *mut libc::sockaddr, &mut len) };
    if ret < 0 {
        return PosixReply::err(errno());
    }
    let bytes = unsafe { std::slice::from_raw_parts(&addr as *const _ as *const u8, len as usize) }.to_vec();
    PosixReply { ret: ret as i64, errno: 0, out: vec![OutArg::Ptr(bytes)] }
}

fn accept_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let Ok(fd) = args[0].as_i64(0) else { return PosixReply::err(libc::EINVAL) };
    accept_common(fd)
}

fn accept4_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(flags)) = (args[0].as_i64(0), args[1].as_i64(1)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let mut addr: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let ret = unsafe {
        libc::accept4(fd as libc::c_int, &mut addr as *mut _ as *mut libc::sockaddr, &mut len, flags as libc::c_int)
    };
    if ret < 0 {
        return PosixReply::err(errno());
    }
    let bytes = unsafe { std::slice::from_raw_parts(&addr as *const _ as *const u8, len as usize) }.to_vec();
    PosixReply { ret: ret as i64, errno: 0, out: vec![OutArg::Ptr(bytes)] }
}

fn shutdown_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(how)) = (args[0].as_i64(0), args[1].as_i64(1)) else {
        return PosixReply::err(libc::EINVAL);
    };
    reply_from_ret(unsafe { libc::shutdown(fd as libc::c_int, how as libc::c_int) } as libc::c_long)
}

fn getsockname_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let Ok(fd) = args[0].as_i64(0) else { return PosixReply::err(libc::EINVAL) };
    let mut addr: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let ret = unsafe { libc::getsockname(fd as libc::c_int, &mut addr as *mut _ as *mut libc::sockaddr, &mut len) };
    if ret < 0 {
        return PosixReply::err(errno());
    }
    let bytes = unsafe { std::slice::from_raw_parts(&addr as *const _ as *const u8, len as usize) }.to_vec();
    PosixReply { ret: 0, errno: 0, out: vec![OutArg::Ptr(bytes)] }
}

fn getpeername_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let Ok(fd) = args[0].as_i64(0) else { return PosixReply::err(libc::EINVAL) };
    let mut addr: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let ret = unsafe { libc::getpeername(fd as libc::c_int, &mut addr as *mut _ as *mut libc::sockaddr, &mut len) };
    if ret < 0 {
        return PosixReply::err(errno());
    }
    let bytes = unsafe { std::slice::from_raw_parts(&addr as *const _ as *const u8, len as usize) }.to_vec();
    PosixReply { ret: 0, errno: 0, out: vec![OutArg::Ptr(bytes)] }
}

fn getsockopt_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(level), Ok(optname), Ok(optlen)) =
        (args[0].as_i64(0), args[1].as_i64(1), args[2].as_i64(2), args[3].as_i64(3))
    else {
        return PosixReply::err(libc::EINVAL);
    };
    let mut buf = vec![0u8; optlen.max(0) as usize];
    let mut len = buf.len() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd as libc::c_int,
            level as libc::c_int,
            optname as libc::c_int,
            buf.as_mut_ptr() as *mut libc::c_void,
            &mut len,
        )
    };
    if ret < 0 {
        return PosixReply::err(errno());
    }
    buf.truncate(len as usize);
    PosixReply { ret: 0, errno: 0, out: vec![OutArg::Ptr(buf)] }
}

fn setsockopt_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(level), Ok(optname), Ok(optval)) =
        (args[0].as_i64(0), args[1].as_i64(1), args[2].as_i64(2), args[3].as_ptr(3))
    else {
        return PosixReply::err(libc::EINVAL);
    };
    let ret = unsafe {
        libc::setsockopt(
            fd as libc::c_int,
            level as libc::c_int,
            optname as libc::c_int,
            optval.as_ptr() as *const libc::c_void,
            optval.len() as libc::socklen_t,
        )
    };
    reply_from_ret(ret as libc::c_long)
}

fn sendto_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(buf), Ok(flags), Ok(addr)) =
        (args[0].as_i64(0), args[1].as_ptr(1), args[2].as_i64(2), args[3].as_ptr(3))
    else {
        return PosixReply::err(libc::EINVAL);
    };
    let ret = unsafe {
        libc::sendto(
            fd as libc::c_int,
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            flags as libc::c_int,
            sockaddr_ptr(addr),
            addr.len() as libc::socklen_t,
        )
    };
    reply_from_ret(ret as libc::c_long)
}

fn recvfrom_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(fd), Ok(len), Ok(flags)) = (args[0].as_i64(0), args[1].as_i64(1), args[2].as_i64(2)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let mut buf = vec![0u8; len.max(0) as usize];
    let mut addr: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut addr_len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let ret = unsafe {
        libc::recvfrom(
            fd as libc::c_int,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            flags as libc::c_int,
            &mut addr as *mut _ as *mut libc::sockaddr,
            &mut addr_len,
        )
    };
    if ret < 0 {
        return PosixReply::err(errno());
    }
    buf.truncate(ret as usize);
    let addr_bytes =
        unsafe { std::slice::from_raw_parts(&addr as *const _ as *const u8, addr_len as usize) }.to_vec();
    PosixReply { ret: ret as i64, errno: 0, out: vec![OutArg::Ptr(buf), OutArg::Ptr(addr_bytes)] }
}

/// `getaddrinfo` resolution, returned as a flat `host:port\0`-style
/// textual list rather than the original's linked `addrinfo` chain —
/// the TEE side only ever consumes the resolved addresses, never the
/// pointer chain itself.
fn getaddrinfo_work(_ctx: &ProxyContext, args: &[PosixArg<'_>]) -> PosixReply {
    let (Ok(node), Ok(service)) = (args[0].as_ptr(0), args[1].as_ptr(1)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let to_cstr = |b: &[u8]| -> Option<std::ffi::CString> {
        let end = b.iter().position(|&x| x == 0)?;
        std::ffi::CString::new(&b[..end]).ok()
    };
    let (Some(node), Some(service)) = (to_cstr(node), to_cstr(service)) else {
        return PosixReply::err(libc::EINVAL);
    };
    let mut res: *mut libc::addrinfo = std::ptr::null_mut();
    let rc = unsafe { libc::getaddrinfo(node.as_ptr(), service.as_ptr(), std::ptr::null(), &mut res) };
    if rc != 0 {
        return PosixReply { ret: rc as i64, errno: libc::EAI_NONAME, out: Vec::new() };
    }
    let mut addrs = Vec::new();
    let mut cur = res;
    while !cur.is_null() {
        let info = unsafe { &*cur };
        let bytes =
            unsafe { std::slice::from_raw_parts(info.ai_addr as *const u8, info.ai_addrlen as usize) }.to_vec();
        addrs.push(OutArg::Ptr(bytes));
        cur = info.ai_next;
    }
    unsafe { libc::freeaddrinfo(res) };
    PosixReply { ret: 0, errno: 0, out: addrs }
}

fn freeaddrinfo_work(_ctx: &ProxyContext, _args: &[PosixArg<'_>]) -> PosixReply {
    // addrinfo chains never cross the wire in this design; the host
    // frees them inline inside getaddrinfo_work, so the explicit free
    // call is a no-op kept only to preserve the table's shape.
    PosixReply::ok(0)
}

fn res_init_work(_ctx: &ProxyContext, _args: &[PosixArg<'_>]) -> PosixReply {
    reply_from_ret(unsafe { libc::res_init() } as libc::c_long)
}

macro_rules! entry {
    ($arity:expr, $f:expr) => {
        FuncEntry { arity: $arity, handler: $f }
    };
}

/// `enum NetworkPosixCallFns` verbatim: index `0` unused, `NET_SOCKET=1`
/// through `NET_RES_INIT=19`.
pub fn table() -> Vec<FuncEntry> {
    vec![
        entry!(0, |_ctx, _a| PosixReply::err(libc::ENOSYS)), // 0: placeholder
        entry!(3, socket_work),                              // 1: NET_SOCKET
        entry!(3, connect_work),                             // 2: NET_CONNECT
        entry!(3, bind_work),                                // 3: NET_BIND
        entry!(2, listen_work),                              // 4: NET_LISTEN
        entry!(1, accept_work),                              // 5: NET_ACCEPT
        entry!(2, accept4_work),                             // 6: NET_ACCEPT4
        entry!(2, shutdown_work),                            // 7: NET_SHUTDOWN
        entry!(1, getsockname_work),                         // 8: NET_GETSOCKNAME
        entry!(4, getsockopt_work),                          // 9: NET_GETSOCKOPT
        entry!(4, setsockopt_work),                          // 10: NET_SETSOCKOPT
        entry!(1, getpeername_work),                         // 11: NET_GETPEERNAME
        entry!(4, sendto_work),                              // 12: NET_SENDTO
        entry!(3, recvfrom_work),                            // 13: NET_RECVFROM
        entry!(4, sendto_work),                              // 14: NET_SENDMSG (flat form: treated as sendto)
        entry!(3, recvfrom_work),                            // 15: NET_RECVMSG (flat form: treated as recvfrom)
        entry!(2, getaddrinfo_work),                         // 16: NET_GETADDRINFO
        entry!(2, getaddrinfo_work),                         // 17: NET_GETADDRINFO_DOFETCH
        entry!(0, freeaddrinfo_work),                        // 18: NET_FREEADDRINFO
        entry!(0, res_init_work),                            // 19: NET_RES_INIT
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ProxyContext {
        ProxyContext::new(-1, -1)
    }

    #[test]
    fn socket_bind_listen_round_trip_a_loopback_tcp_socket() {
        let table = table();
        let sock_reply = (table[1].handler)(
            &ctx(),
            &[PosixArg::I64(libc::AF_INET as i64), PosixArg::I64(libc::SOCK_STREAM as i64), PosixArg::I64(0)],
        );
        assert_eq!(sock_reply.errno, 0);
        let fd = sock_reply.ret as i32;
        assert!(fd >= 0);

        let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_addr.s_addr = u32::from_ne_bytes([127, 0, 0, 1]);
        let addr_bytes = unsafe {
            std::slice::from_raw_parts(&addr as *const _ as *const u8, std::mem::size_of::<libc::sockaddr_in>())
        };

        let bind_reply = (table[3].handler)(
            &ctx(),
            &[PosixArg::I64(fd as i64), PosixArg::Ptr(addr_bytes), PosixArg::I64(addr_bytes.len() as i64)],
        );
        assert_eq!(bind_reply.errno, 0);

        let listen_reply = (table[4].handler)(&ctx(), &[PosixArg::I64(fd as i64), PosixArg::I64(1)]);
        assert_eq!(listen_reply.errno, 0);

        unsafe { libc::close(fd) };
    }

    #[test]
    fn socket_rejects_an_unsupported_domain() {
        let reply = (table()[1].handler)(&ctx(), &[PosixArg::I64(9999), PosixArg::I64(0), PosixArg::I64(0)]);
        assert_ne!(reply.errno, 0);
    }
}
