#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]
//! Cross-domain POSIX call executor (spec §4.I, §4.J): turns
//! shared-memory tasklet requests coming from the TEE into host POSIX
//! calls and stages large buffers ("pkgs") that don't fit a single
//! request.
//!
//! Grounded on `posix_proxy/src/posix_proxy.c`'s `struct PosixProxy`
//! (owning a control tasklet and a data tasklet over the same driver
//! fd) and `posix_data_handler.c`'s `PosixDataTaskletCallHandler`
//! (decode header, pick a function table by `call->type`, dispatch,
//! encode the reply).

pub mod context;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod file;
pub mod network;
pub mod other;
pub mod pkg;
pub mod serialize;

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tee_xtasklet::TaskHandler;

pub use context::ProxyContext;
pub use control::ControlHandler;
pub use error::{ProxyError, Result};

const PKG_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// The data tasklet's [`TaskHandler`]: decode a `PosixCall`, route it
/// through the matching function table, encode the reply
/// (`PosixDataTaskletCallHandler`).
pub struct DataTaskletHandler {
    ctx: Arc<ProxyContext>,
    file_table: Vec<dispatch::FuncEntry>,
    network_table: Vec<dispatch::FuncEntry>,
    other_table: Vec<dispatch::FuncEntry>,
}

impl DataTaskletHandler {
    /// Build a handler over `ctx`, with the three function tables fixed
    /// at construction per Design Note §9 ("the table is built once,
    /// not re-allocated per call").
    pub fn new(ctx: Arc<ProxyContext>) -> Self {
        DataTaskletHandler {
            ctx,
            file_table: file::table(),
            network_table: network::table(),
            other_table: other::table(),
        }
    }
}

impl TaskHandler for DataTaskletHandler {
    fn handle(&self, payload: &[u8]) -> Vec<u8> {
        let call = match dispatch::decode_request(payload) {
            Ok(call) => call,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed posix call");
                return dispatch::PosixReply::err(libc::EINVAL).encode();
            }
        };
        let table = match call.kind {
            dispatch::RequestKind::File => &self.file_table,
            dispatch::RequestKind::Network => &self.network_table,
            dispatch::RequestKind::Other => &self.other_table,
        };
        let reply = match dispatch::dispatch(&self.ctx, call.kind, table, call.func, &call.args) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "posix call dispatch rejected");
                dispatch::PosixReply::err(libc::EINVAL)
            }
        };
        reply.encode()
    }
}

/// Background sweeper that reclaims pkgs past [`pkg::pkg_timeout_us`]
/// (`FdListDelTimeoutPkg`), parked on a 10s `Condvar::wait_timeout` the
/// same way the original's recycle thread parks rather than busy-polls.
pub struct PkgSweeper {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl PkgSweeper {
    /// Spawn a thread that sweeps `ctx`'s pkg table every
    /// [`PKG_SWEEP_INTERVAL`] until dropped.
    pub fn spawn(ctx: Arc<ProxyContext>) -> Self {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let stop_for_thread = stop.clone();
        let handle = std::thread::spawn(move || {
            let (lock, cvar) = &*stop_for_thread;
            let mut stopped = lock.lock().unwrap();
            while !*stopped {
                let (guard, timeout) = cvar.wait_timeout(stopped, PKG_SWEEP_INTERVAL).unwrap();
                stopped = guard;
                if *stopped {
                    break;
                }
                if timeout.timed_out() {
                    let now_us = std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .map(|d| d.as_micros() as u64)
                        .unwrap_or(0);
                    let reclaimed = ctx.pkgs.sweep_timeouts(now_us);
                    if reclaimed > 0 {
                        metrics::counter!("tee_posix_proxy_pkgs_reclaimed_total").increment(reclaimed as u64);
                        tracing::debug!(reclaimed, "swept timed-out pkgs");
                    }
                }
            }
        });
        PkgSweeper { stop, handle: Some(handle) }
    }
}

impl Drop for PkgSweeper {
    fn drop(&mut self) {
        {
            let (lock, cvar) = &*self.stop;
            let mut stopped = lock.lock().unwrap();
            *stopped = true;
            cvar.notify_one();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::{encode_args, OutArg};

    fn wire_call(call_type: u32, func: u32, args: &[OutArg]) -> Vec<u8> {
        let encoded = encode_args(args);
        let mut buf = Vec::new();
        buf.extend_from_slice(&call_type.to_ne_bytes());
        buf.extend_from_slice(&func.to_ne_bytes());
        buf.extend_from_slice(&0i32.to_ne_bytes());
        buf.extend_from_slice(&(encoded.len() as u32).to_ne_bytes());
        buf.extend_from_slice(&encoded);
        buf
    }

    #[test]
    fn handler_routes_a_file_call_and_encodes_the_reply() {
        let ctx = Arc::new(ProxyContext::new(-1, -1));
        let handler = DataTaskletHandler::new(ctx);
        // FILE_UMASK = 31, takes one integer arg.
        let request = wire_call(0, 31, &[OutArg::I64(0o022)]);
        let reply = handler.handle(&request);
        assert!(reply.len() >= 16);
    }

    #[test]
    fn handler_reports_invalid_on_a_malformed_request() {
        let ctx = Arc::new(ProxyContext::new(-1, -1));
        let handler = DataTaskletHandler::new(ctx);
        let reply = handler.handle(&[1, 2, 3]);
        let errno = i32::from_ne_bytes(reply[8..12].try_into().unwrap());
        assert_eq!(errno, libc::EINVAL);
    }
}
