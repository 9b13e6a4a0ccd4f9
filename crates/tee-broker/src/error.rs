//! Broker-local error type.

use thiserror::Error;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors the broker (or its client connector) can report.
///
/// These map onto the taxonomy in `tee_wire::TeeError` at the call sites
/// that hand a result back to a CA; internally the broker keeps its own
/// narrower type so socket/ioctl failures are distinguishable in logs.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// A socket syscall failed.
    #[error("socket error: {0}")]
    Socket(#[from] nix::Error),
    /// An I/O operation (opening the driver device, reading `/proc`) failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The peer sent a malformed or truncated request.
    #[error("malformed request from peer")]
    MalformedRequest,
    /// The broker's declared protocol version does not satisfy the
    /// driver's reported version (spec §4.F version negotiation).
    #[error("check teecd version failed")]
    VersionMismatch,
    /// No connection to the broker could be established after the
    /// configured retry budget.
    #[error("try connect ca daemon failed, fail_counts = {attempts}")]
    ConnectRetriesExhausted {
        /// Number of attempts made before giving up.
        attempts: u32,
    },
    /// The peer's `SCM_RIGHTS` reply did not contain a file descriptor.
    #[error("no file descriptor received")]
    NoFileDescriptor,
}
