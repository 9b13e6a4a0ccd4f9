//! Shared state every function-table handler gets a reference to: the
//! fd-safety invariants and the pkg staging table (spec §4.I, §4.J).

use crate::error::{ProxyError, Result};
use crate::pkg::PkgTable;

/// Host-side state threaded through every dispatched call.
///
/// Grounded on `posix_proxy`'s `fd_list.h` comment that the driver fd and
/// a "pre-close" fd opened before the first session must never become
/// reachable through a TEE-requested `close`/`dup`/`dup2` — the original
/// enforces this with a pair of global fd checks at the top of those
/// handlers; here it's a field checked the same way, without the
/// globals.
pub struct ProxyContext {
    /// The fd backing `/dev/tee0` (or whichever driver node the broker
    /// connected). Closing or dup'ing over this from inside a proxied
    /// call would sever every other session sharing the device.
    pub driver_fd: i32,
    /// A host-only fd opened before any session existed (e.g. a log file
    /// or the broker's listening socket) that must stay outside the
    /// TEE's reach for the same reason.
    pub pre_close_fd: i32,
    /// Pending large-buffer pkg transfers, keyed by `(fd, tee_index)`.
    pub pkgs: PkgTable,
}

impl ProxyContext {
    /// Build a context guarding `driver_fd` and `pre_close_fd`.
    pub fn new(driver_fd: i32, pre_close_fd: i32) -> Self {
        ProxyContext { driver_fd, pre_close_fd, pkgs: PkgTable::new() }
    }

    /// Reject `fd` if it is one of the two reserved fds.
    pub fn check_not_reserved(&self, fd: i32) -> Result<()> {
        if fd == self.driver_fd || fd == self.pre_close_fd {
            Err(ProxyError::ReservedFd(fd))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_the_driver_fd_and_the_pre_close_fd() {
        let ctx = ProxyContext::new(3, 4);
        assert!(matches!(ctx.check_not_reserved(3), Err(ProxyError::ReservedFd(3))));
        assert!(matches!(ctx.check_not_reserved(4), Err(ProxyError::ReservedFd(4))));
        assert!(ctx.check_not_reserved(5).is_ok());
    }
}
