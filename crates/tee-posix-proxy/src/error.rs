//! Error taxonomy for decoding and dispatching POSIX-proxy requests.
//!
//! Distinct from [`tee_wire::TeeError`]: everything here is a *protocol*
//! failure (malformed request, unknown function, arity mismatch) that
//! happens before a POSIX call is even attempted. A POSIX call's own
//! failure is reported as a negative `ret`/positive `errno` pair inside
//! the reply payload, per spec §7 ("agents report errors inside the
//! shared-memory struct's `ret`/`error` fields and never leak them
//! through signals") — the same convention this crate's replies follow.

use thiserror::Error;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Failures that prevent a request from being decoded or routed to a
/// handler at all.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProxyError {
    /// The buffer was too short to hold even the fixed request header.
    #[error("request buffer shorter than the PosixCall header")]
    TruncatedHeader,
    /// `call_type` did not match [`crate::dispatch::RequestKind`].
    #[error("unknown posix call type {0}")]
    UnknownCallType(u32),
    /// `func` exceeded the selected type's function table length
    /// ("a decode error, not a silent default", per Design Note §9).
    #[error("func {func} exceeds the {call_type:?} table (len {table_len})")]
    UnknownFunction {
        /// The request's call type.
        call_type: &'static str,
        /// The out-of-range function index.
        func: u32,
        /// Length of the table that was indexed.
        table_len: usize,
    },
    /// An argument's declared tag did not match what the handler expected
    /// at that position.
    #[error("arg {index}: expected tag {expected}, found {found}")]
    TagMismatch {
        /// Zero-based argument position.
        index: usize,
        /// Tag the handler required.
        expected: u64,
        /// Tag actually present on the wire.
        found: u64,
    },
    /// A pointer argument's declared length ran past the end of the
    /// request buffer.
    #[error("arg {index}: pointer of size {size} runs past the request buffer")]
    PointerOutOfBounds {
        /// Zero-based argument position.
        index: usize,
        /// Declared size of the pointer argument.
        size: usize,
    },
    /// The request declared fewer arguments than the handler requires.
    #[error("expected at least {expected} args, request carried {found}")]
    ArityMismatch {
        /// Arity the handler's table entry declares.
        expected: u32,
        /// Arg count actually present on the wire.
        found: u32,
    },
    /// `close`/`dup`/`dup2` targeted the proxy's reserved driver fd or its
    /// pre-close fd.
    #[error("fd {0} is reserved and cannot be closed, dup'd, or dup2'd over")]
    ReservedFd(i32),
    /// `ioctl` was asked for a code outside the host's whitelist.
    #[error("ioctl code {0:#x} is not in the host whitelist")]
    IoctlNotWhitelisted(u32),
    /// A `(fd, tee_index)` pkg key collided with an existing entry.
    #[error("pkg (fd={fd}, tee_index={tee_index}) already staged")]
    PkgAlreadyExists {
        /// Owning fd.
        fd: i32,
        /// TEE-assigned index.
        tee_index: u64,
    },
    /// `get_pkg`/`release_pkg` referenced a key with no staged buffer.
    #[error("pkg (fd={fd}, tee_index={tee_index}) not found")]
    PkgNotFound {
        /// Owning fd.
        fd: i32,
        /// TEE-assigned index.
        tee_index: u64,
    },
}
