//! The broker daemon: listens on an `AF_UNIX` socket and vends
//! authenticated driver file descriptors to connecting CAs (spec §4.F).
//!
//! Grounded on `original_source/src/teecd/tee_ca_daemon.c`
//! (`CaServerWorkThread`/`ProcessAccept`/`ProcessCaMsg`/`SendFileDescriptor`)
//! and `src/common/tee_version_check.c` (`CheckTzdriverVersion`). One
//! `std::thread` services each accepted connection, matching the CORE's
//! plain-thread concurrency model (spec §5) rather than the original's
//! single-threaded `accept` loop — the original processes one CA at a
//! time; this implementation lets multiple CAs authenticate concurrently
//! without serializing on a single socket.

use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::io::FromRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::socket::{
    accept, bind, getsockopt, listen, recvmsg, sendmsg, socket, sockopt::PeerCredentials,
    AddressFamily, Backlog, ControlMessage, MsgFlags, SockFlag, SockType, UnixAddr,
};
use nix::unistd::close;
use tee_driver::DeviceHandle;
use tracing::{debug, info, warn};

use crate::error::{BrokerError, Result};
use crate::identity::{exe_path_for_pid, user_name_for_uid};
use crate::login::build_identity_descriptor;
use crate::protocol::{CaKind, Command, Request, Response, REQUEST_WIRE_SIZE};

/// This broker's declared protocol version
/// (`TEEC_CLIENT_VERSION_MAJOR_SELF`/`_MINOR_SELF` in the original).
pub const PROTOCOL_MAJOR: u16 = 1;
/// This broker's declared protocol version, minor component.
pub const PROTOCOL_MINOR: u16 = 0;

/// How the broker's listening socket is addressed: an abstract-namespace
/// name (Linux-only, no filesystem entry, default) or a filesystem path.
#[derive(Debug, Clone)]
pub enum SocketAddrKind {
    /// An abstract-namespace socket name, e.g. `"tc_ns_socket"`.
    Abstract(String),
    /// A filesystem-backed socket path.
    Path(PathBuf),
}

/// Configuration for one broker instance.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address the broker listens on.
    pub socket: SocketAddrKind,
    /// Path to the client-facing device the broker opens on behalf of
    /// each authenticated CA.
    pub client_device_path: String,
    /// Path to the private device used for the one-time driver version
    /// probe at startup.
    pub private_device_path: String,
    /// Path to the passwd-style file used for username lookups.
    pub passwd_path: PathBuf,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            socket: SocketAddrKind::Abstract("tc_ns_socket".to_string()),
            client_device_path: tee_driver::CLIENT_DEV_PATH.to_string(),
            private_device_path: tee_driver::PRIVATE_DEV_PATH.to_string(),
            passwd_path: PathBuf::from("/etc/passwd"),
        }
    }
}

/// The running broker: owns configuration plus the outcome of the
/// startup driver-version negotiation.
pub struct Broker {
    config: BrokerConfig,
    version_ok: AtomicBool,
}

impl Broker {
    /// Build a broker that has not yet negotiated a driver version; call
    /// [`Broker::negotiate_version`] before serving `GET_FD` requests.
    pub fn new(config: BrokerConfig) -> Self {
        Broker {
            config,
            version_ok: AtomicBool::new(false),
        }
    }

    /// Probe the driver's reported tzdriver version via `GET_TEE_INFO` and
    /// compare it against this broker's expectations, mirroring
    /// `CheckTzdriverVersion`. Until this succeeds, `GET_FD` requests are
    /// refused (spec §4.F).
    ///
    /// The comparison rule (from the original): major versions must match
    /// exactly; the broker's minor version must be <= the driver's.
    pub fn negotiate_version(&self, expect_major: u16, expect_minor: u16) -> Result<()> {
        let handle = DeviceHandle::open(&self.config.private_device_path)?;
        let mut info = tee_driver::TeeInfo::default();
        let outcome = handle.get_tee_info(&mut info);
        if !outcome.ioctl_succeeded() {
            warn!(errno = outcome.errno, "failed to get tee info");
            return Err(BrokerError::VersionMismatch);
        }
        let major_ok = info.version_major == expect_major as u32;
        let minor_ok = info.version_minor >= expect_minor as u32;
        if major_ok && minor_ok {
            info!(
                driver_major = info.version_major,
                driver_minor = info.version_minor,
                "tzdriver version check passed"
            );
            self.version_ok.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            warn!(
                expect_major,
                expect_minor,
                driver_major = info.version_major,
                driver_minor = info.version_minor,
                "check teecd version failed"
            );
            self.version_ok.store(false, Ordering::SeqCst);
            Err(BrokerError::VersionMismatch)
        }
    }

    /// Bind, listen, and serve connections until the process exits.
    /// Spawns one detached thread per accepted connection.
    pub fn run(&self) -> Result<()> {
        let listen_fd = bind_and_listen(&self.config.socket)?;
        info!(socket = ?self.config.socket, "broker listening");
        loop {
            let accepted = match accept(listen_fd.as_raw_fd()) {
                Ok(fd) => fd,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let client_device_path = self.config.client_device_path.clone();
            let passwd_path = self.config.passwd_path.clone();
            let version_ok = self.version_ok.load(Ordering::SeqCst);
            std::thread::spawn(move || {
                let owned = unsafe { OwnedFd::from_raw_fd(accepted) };
                if let Err(e) =
                    serve_connection(owned.as_raw_fd(), &client_device_path, &passwd_path, version_ok)
                {
                    debug!(error = %e, "connection handling failed");
                }
            });
        }
    }
}

fn bind_and_listen(addr: &SocketAddrKind) -> Result<OwnedFd> {
    let fd = socket(
        AddressFamily::Unix,
        SockType::Stream,
        SockFlag::empty(),
        None,
    )?;
    let unix_addr = match addr {
        SocketAddrKind::Abstract(name) => UnixAddr::new_abstract(name.as_bytes())?,
        SocketAddrKind::Path(path) => {
            let _ = std::fs::remove_file(path);
            UnixAddr::new(path)?
        }
    };
    bind(fd.as_raw_fd(), &unix_addr)?;
    listen(&fd, Backlog::new(10).unwrap_or(Backlog::MAXCONN))?;
    Ok(fd)
}

/// Service exactly one request on an already-accepted connection, mirroring
/// `ProcessAccept`'s body for a single iteration (the original loops
/// forever per-listener rather than per-connection since it never
/// multi-threads; here the caller's accept loop supplies one call per
/// connection instead).
fn serve_connection(
    fd: RawFd,
    client_device_path: &str,
    passwd_path: &std::path::Path,
    version_ok: bool,
) -> Result<()> {
    let cred = get_peer_cred(fd)?;
    debug!(uid = cred.0, pid = cred.1, "accepted connection");

    let req = recv_request(fd)?;

    let response = match req.command {
        Command::GetTeecdVersion => Response {
            major: PROTOCOL_MAJOR,
            minor: PROTOCOL_MINOR,
            tee_max_api_level: 0,
        },
        Command::GetTeeVersion => {
            let handle = DeviceHandle::open(client_device_path)?;
            let mut version = 0u32;
            let outcome = handle.get_tee_version(&mut version);
            if !outcome.ioctl_succeeded() {
                return Err(BrokerError::NoFileDescriptor);
            }
            Response {
                major: 0,
                minor: 0,
                tee_max_api_level: version,
            }
        }
        Command::SetSysXml => Response::default(),
        Command::GetFd => {
            if !version_ok {
                return Err(BrokerError::VersionMismatch);
            }
            let driver_fd = open_and_login(client_device_path, passwd_path, cred, req.auth.kind)?;
            let response = Response {
                major: PROTOCOL_MAJOR,
                minor: PROTOCOL_MINOR,
                tee_max_api_level: 0,
            };
            send_response_with_fd(fd, response, driver_fd)?;
            let _ = close(driver_fd);
            return Ok(());
        }
    };

    send_response(fd, response)
}

/// Open the client device, install the CA's login identity, and return the
/// now-authenticated fd ready to be handed to the CA (`ProcessCaMsg`).
fn open_and_login(
    client_device_path: &str,
    passwd_path: &std::path::Path,
    cred: (u32, i32),
    _kind: CaKind,
) -> Result<RawFd> {
    let handle = DeviceHandle::open(client_device_path)?;
    let (uid, pid) = cred;
    let exe_path = exe_path_for_pid(pid).unwrap_or_default();
    let user_name = user_name_for_uid(uid, passwd_path).unwrap_or_default();
    let descriptor = build_identity_descriptor(&exe_path, &user_name)
        .ok_or(BrokerError::MalformedRequest)?;
    let outcome = handle.set_login_identity(&descriptor);
    if !outcome.ioctl_succeeded() {
        warn!(errno = outcome.errno, "set login identity failed");
        return Err(BrokerError::NoFileDescriptor);
    }
    // `handle` closes its fd when dropped at the end of this function;
    // duplicate it first so the copy handed to the CA over SCM_RIGHTS
    // outlives that drop.
    let dup = nix::unistd::dup(handle.as_raw_fd())?;
    Ok(dup)
}

fn get_peer_cred(fd: RawFd) -> Result<(u32, i32)> {
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let cred = getsockopt(&borrowed, PeerCredentials)?;
    Ok((cred.uid(), cred.pid()))
}

fn recv_request(fd: RawFd) -> Result<Request> {
    let mut buf = Box::new([0u8; REQUEST_WIRE_SIZE]);
    let mut iov = [std::io::IoSliceMut::new(&mut buf[..])];
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let msg = recvmsg::<UnixAddr>(borrowed.as_raw_fd(), &mut iov, None, MsgFlags::empty())?;
    if msg.bytes == 0 {
        return Err(BrokerError::MalformedRequest);
    }
    Request::from_wire(&buf).ok_or(BrokerError::MalformedRequest)
}

fn send_response(fd: RawFd, response: Response) -> Result<()> {
    let wire = response.to_wire();
    let iov = [std::io::IoSlice::new(&wire)];
    sendmsg::<UnixAddr>(fd, &iov, &[], MsgFlags::empty(), None)?;
    Ok(())
}

fn send_response_with_fd(fd: RawFd, response: Response, payload_fd: RawFd) -> Result<()> {
    let wire = response.to_wire();
    let iov = [std::io::IoSlice::new(&wire)];
    let fds = [payload_fd];
    let cmsg = [ControlMessage::ScmRights(&fds)];
    sendmsg::<UnixAddr>(fd, &iov, &cmsg, MsgFlags::empty(), None)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CaAuthInfo;

    #[test]
    fn config_default_uses_abstract_socket() {
        let cfg = BrokerConfig::default();
        matches!(cfg.socket, SocketAddrKind::Abstract(_));
    }

    #[test]
    fn get_fd_is_refused_while_version_is_not_negotiated() {
        // A failed (or not-yet-run) version negotiation must fail every
        // subsequent GET_FD request. `serve_connection` takes the verdict
        // as a plain bool, so this is exercisable over a socketpair alone.
        use nix::sys::socket::{socketpair, AddressFamily as Af, SockFlag as Flags, SockType as Ty};
        use std::io::Write;
        use std::os::unix::net::UnixStream;

        let (a, b) = socketpair(Af::Unix, Ty::Stream, None, Flags::empty()).unwrap();
        let req = Request {
            command: Command::GetFd,
            auth: CaAuthInfo {
                kind: CaKind::App,
                uid: 0,
                pid: 0,
                from_hidl: false,
            },
            certs: vec![],
            xml: vec![],
        };
        let wire = req.to_wire();
        let mut a = UnixStream::from(a);
        a.write_all(&wire).unwrap();

        let result = serve_connection(
            b.as_raw_fd(),
            "/nonexistent/client-device",
            std::path::Path::new("/nonexistent/passwd"),
            false,
        );
        assert!(matches!(result, Err(BrokerError::VersionMismatch)));
    }

    #[test]
    fn request_wire_round_trip_through_recv_path_shape() {
        // serve_connection's framing assumes a single fixed-size recvmsg;
        // confirm the request encodes to exactly REQUEST_WIRE_SIZE bytes.
        let req = Request {
            command: Command::GetFd,
            auth: CaAuthInfo {
                kind: CaKind::App,
                uid: 1,
                pid: 2,
                from_hidl: false,
            },
            certs: vec![],
            xml: vec![],
        };
        assert_eq!(req.to_wire().len(), REQUEST_WIRE_SIZE);
    }
}
