//! Request/reply framing and function-table dispatch for the data
//! tasklet (spec §4.I).
//!
//! Grounded on
//! `posix_proxy/include/posix_data_handler.h` (`struct PosixCall`,
//! `enum PosixCallTypes`, `enum {file,Network,Other}PosixCallFns`,
//! `struct PosixFunc`, `PosixDataTaskletCallHandler`). Per Design Note
//! §9, the raw `switch (type) { switch(func) }` nesting is replaced with
//! a tagged `RequestKind` plus one function table per kind, each entry
//! declaring its own arity; indexing past a table's length is a decode
//! error rather than a silently-ignored default case.

use crate::error::{ProxyError, Result};
use crate::serialize::{decode_args, encode_args, OutArg, PosixArg};

/// `enum PosixCallTypes` — which function table a request's `func`
/// indexes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RequestKind {
    /// File-relative calls (`POSIX_CALL_FILE`).
    File = 0,
    /// Socket-relative calls (`POSIX_CALL_NETWORK`).
    Network = 1,
    /// Everything else: epoll, select, ioctl, pkg (`POSIX_CALL_OTHER`).
    Other = 2,
}

impl RequestKind {
    fn from_u32(v: u32) -> Result<Self> {
        match v {
            0 => Ok(RequestKind::File),
            1 => Ok(RequestKind::Network),
            2 => Ok(RequestKind::Other),
            other => Err(ProxyError::UnknownCallType(other)),
        }
    }

    /// Name used in [`ProxyError::UnknownFunction`].
    pub fn table_name(self) -> &'static str {
        match self {
            RequestKind::File => "File",
            RequestKind::Network => "Network",
            RequestKind::Other => "Other",
        }
    }
}

const HEADER_LEN: usize = 16; // call_type: u32, func: u32, err: i32, args_sz: u32

/// A decoded `PosixCall` request: which table to dispatch through, which
/// entry, and its self-describing argument list.
#[derive(Debug)]
pub struct PosixCall<'a> {
    /// Which function table `func` indexes into.
    pub kind: RequestKind,
    /// Index into that table.
    pub func: u32,
    /// Decoded, bound-checked arguments.
    pub args: Vec<PosixArg<'a>>,
}

/// Parse a raw tasklet task payload into a [`PosixCall`]
/// (`PosixDataTaskletCallHandler`'s header read).
pub fn decode_request(buf: &[u8]) -> Result<PosixCall<'_>> {
    if buf.len() < HEADER_LEN {
        return Err(ProxyError::TruncatedHeader);
    }
    let call_type = u32::from_ne_bytes(buf[0..4].try_into().unwrap());
    let func = u32::from_ne_bytes(buf[4..8].try_into().unwrap());
    let args_sz = u32::from_ne_bytes(buf[12..16].try_into().unwrap()) as usize;
    let args_buf = buf
        .get(HEADER_LEN..HEADER_LEN + args_sz)
        .ok_or(ProxyError::TruncatedHeader)?;
    let args = decode_args(args_buf)?;
    Ok(PosixCall { kind: RequestKind::from_u32(call_type)?, func, args })
}

/// The result of running a handler: a POSIX-style `(ret, errno)` pair
/// plus any out-parameters (stat buffers, `F_GETLK` lock struct,
/// `getaddrinfo` node data, …), never a Rust `Err` — POSIX failures are
/// in-band per spec §7.
#[derive(Debug, Default)]
pub struct PosixReply {
    /// The primary return value (POSIX call's return, or a `pkg`/proxy
    /// specific result code).
    pub ret: i64,
    /// `errno` at the time of failure; `0` on success.
    pub errno: i32,
    /// Additional out-parameters appended to the reply.
    pub out: Vec<OutArg>,
}

impl PosixReply {
    /// Build a success reply with no out-parameters.
    pub fn ok(ret: i64) -> Self {
        PosixReply { ret, errno: 0, out: Vec::new() }
    }

    /// Build a failure reply carrying `errno`.
    pub fn err(errno: i32) -> Self {
        PosixReply { ret: -1, errno, out: Vec::new() }
    }

    /// Encode this reply the way [`decode_request`]'s args were decoded:
    /// `ret: i64, errno: i32, pad: u32, out-args...`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + 64);
        out.extend_from_slice(&self.ret.to_ne_bytes());
        out.extend_from_slice(&self.errno.to_ne_bytes());
        out.extend_from_slice(&0u32.to_ne_bytes());
        out.extend_from_slice(&encode_args(&self.out));
        out
    }
}

/// One entry in a function table: its declared arity and the handler to
/// invoke once arity has been checked (`struct PosixFunc`).
pub struct FuncEntry {
    /// Minimum argument count the request must carry
    /// (`enum PosixCallArgCount`).
    pub arity: u32,
    /// The handler itself.
    pub handler: fn(&crate::context::ProxyContext, &[PosixArg<'_>]) -> PosixReply,
}

/// Look up `func` in `table`, check its declared arity against `args`,
/// and run it — or produce a decode error naming `kind`.
pub fn dispatch<'a>(
    ctx: &crate::context::ProxyContext,
    kind: RequestKind,
    table: &[FuncEntry],
    func: u32,
    args: &[PosixArg<'a>],
) -> Result<PosixReply> {
    let entry = table.get(func as usize).ok_or(ProxyError::UnknownFunction {
        call_type: kind.table_name(),
        func,
        table_len: table.len(),
    })?;
    if (args.len() as u32) < entry.arity {
        return Err(ProxyError::ArityMismatch { expected: entry.arity, found: args.len() as u32 });
    }
    Ok((entry.handler)(ctx, args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::OutArg;

    fn wire(call_type: u32, func: u32, args: &[OutArg]) -> Vec<u8> {
        let encoded_args = encode_args(args);
        let mut buf = Vec::new();
        buf.extend_from_slice(&call_type.to_ne_bytes());
        buf.extend_from_slice(&func.to_ne_bytes());
        buf.extend_from_slice(&0i32.to_ne_bytes());
        buf.extend_from_slice(&(encoded_args.len() as u32).to_ne_bytes());
        buf.extend_from_slice(&encoded_args);
        buf
    }

    #[test]
    fn decodes_a_well_formed_request() {
        let buf = wire(0, 3, &[OutArg::I64(5), OutArg::I64(6)]);
        let call = decode_request(&buf).unwrap();
        assert_eq!(call.kind, RequestKind::File);
        assert_eq!(call.func, 3);
        assert_eq!(call.args.len(), 2);
    }

    #[test]
    fn rejects_an_unknown_call_type() {
        let buf = wire(7, 0, &[]);
        assert!(matches!(decode_request(&buf).unwrap_err(), ProxyError::UnknownCallType(7)));
    }

    fn ctx() -> crate::context::ProxyContext {
        crate::context::ProxyContext::new(-100, -101)
    }

    #[test]
    fn dispatch_rejects_a_func_past_the_table_end() {
        let table = [FuncEntry { arity: 0, handler: |_, _| PosixReply::ok(0) }];
        let err = dispatch(&ctx(), RequestKind::File, &table, 5, &[]).unwrap_err();
        assert!(matches!(err, ProxyError::UnknownFunction { func: 5, table_len: 1, .. }));
    }

    #[test]
    fn dispatch_rejects_too_few_args() {
        let table = [FuncEntry { arity: 2, handler: |_, _| PosixReply::ok(0) }];
        let err = dispatch(&ctx(), RequestKind::File, &table, 0, &[PosixArg::I64(1)]).unwrap_err();
        assert!(matches!(err, ProxyError::ArityMismatch { expected: 2, found: 1 }));
    }

    #[test]
    fn reply_round_trips_through_encode() {
        let reply = PosixReply { ret: 42, errno: 0, out: vec![OutArg::I64(7)] };
        let encoded = reply.encode();
        assert_eq!(i64::from_ne_bytes(encoded[0..8].try_into().unwrap()), 42);
        assert_eq!(i32::from_ne_bytes(encoded[8..12].try_into().unwrap()), 0);
    }
}
