//! The cross-cutting error taxonomy shared by every crate (spec §7).

use thiserror::Error;

/// Result alias used throughout the stack.
pub type Result<T> = std::result::Result<T, TeeError>;

/// Abstract error taxonomy a CA-facing API can return.
///
/// Every variant optionally carries the TEE-side `(origin, code)` pair so
/// that detail reported inside the driver's in-struct `TC_NS_ClientReturn`
/// survives marshalling back to the caller, per spec §7.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TeeError {
    /// Caller-supplied input failed validation before any ioctl was issued.
    #[error("bad parameters (origin={origin:?}, code={code:?})")]
    BadParameters {
        /// TEE-reported origin of the failure, if known.
        origin: Option<u32>,
        /// TEE-reported error code, if known.
        code: Option<u32>,
    },
    /// The kernel or filesystem refused the operation.
    #[error("access denied (origin={origin:?}, code={code:?})")]
    AccessDenied {
        /// TEE-reported origin of the failure, if known.
        origin: Option<u32>,
        /// TEE-reported error code, if known.
        code: Option<u32>,
    },
    /// Allocation failed on the host or in the TEE.
    #[error("out of memory (origin={origin:?}, code={code:?})")]
    OutOfMemory {
        /// TEE-reported origin of the failure, if known.
        origin: Option<u32>,
        /// TEE-reported error code, if known.
        code: Option<u32>,
    },
    /// The driver or ioctl reported a non-specific failure.
    #[error("generic driver failure (errno={errno}, origin={origin:?}, code={code:?})")]
    Generic {
        /// Raw errno-style value returned by the ioctl.
        errno: i32,
        /// TEE-reported origin of the failure, if known.
        origin: Option<u32>,
        /// TEE-reported error code, if known.
        code: Option<u32>,
    },
    /// The TEE-side endpoint has crashed; the session must be discarded.
    #[error("target TA is dead")]
    TargetDead,
    /// The broker refused the connecting CA's identity.
    #[error("CA authentication failed: {reason}")]
    CaAuthFailed {
        /// Human-readable reason surfaced in logs.
        reason: &'static str,
    },
    /// A cancel or shutdown fired during the operation.
    #[error("operation interrupted")]
    Interrupted,
    /// The platform does not expose the requested feature.
    #[error("not supported on this platform")]
    NotSupported,
    /// The TA image could not be loaded.
    #[error("trusted application load error (code={code:?})")]
    TrustedAppLoadError {
        /// Loader-reported error code, if known.
        code: Option<i32>,
    },
}

impl TeeError {
    /// Construct a bare [`TeeError::BadParameters`] with no TEE-side detail.
    pub const fn bad_parameters() -> Self {
        TeeError::BadParameters {
            origin: None,
            code: None,
        }
    }
}

/// The origin field the driver reports alongside a failing return code —
/// which layer detected the failure (API, communication, trusted OS, or
/// the TA itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorOrigin {
    /// Detected inside the client API before any ioctl was issued.
    Api = 0x1,
    /// Detected while communicating with the driver.
    Comms = 0x2,
    /// Detected by the trusted OS.
    TrustedOs = 0x3,
    /// Detected by the TA itself.
    TrustedApp = 0x4,
}

/// The raw result of an ioctl call: an errno-style return plus the
/// driver's in-struct `(code, origin)` pair (`TC_NS_ClientReturn`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriverOutcome {
    /// Zero on success; otherwise a negative `-errno` value, as returned
    /// directly by the `ioctl(2)` syscall.
    pub errno: i32,
    /// In-struct error code reported by the TEE.
    pub code: u32,
    /// In-struct origin reported by the TEE.
    pub origin: u32,
}

impl DriverOutcome {
    /// A successful outcome with no TEE-side detail.
    pub const SUCCESS: DriverOutcome = DriverOutcome {
        errno: 0,
        code: 0,
        origin: 0,
    };

    /// Whether the ioctl itself succeeded (a zero return does not imply
    /// the TEE-side `code` is also success — callers check both).
    pub const fn ioctl_succeeded(&self) -> bool {
        self.errno == 0
    }

    /// Translate the raw outcome into the abstract taxonomy, mirroring
    /// `TranslateRetValue` in `original_source/src/libteec_vendor/tee_client_api.c`:
    /// `-EINVAL -> BadParameters`, `-EFAULT -> AccessDenied`,
    /// `-ENOMEM -> OutOfMemory`, anything else non-zero -> `Generic`.
    pub fn into_tee_error(self) -> TeeError {
        let origin = Some(self.origin);
        let code = Some(self.code);
        match self.errno {
            0 => TeeError::bad_parameters(), // caller should not call this on success
            e if e == -libc_einval() => TeeError::BadParameters { origin, code },
            e if e == -libc_efault() => TeeError::AccessDenied { origin, code },
            e if e == -libc_enomem() => TeeError::OutOfMemory { origin, code },
            e => TeeError::Generic {
                errno: e,
                origin,
                code,
            },
        }
    }
}

// Kept as tiny free functions (rather than pulling in `libc` here) so
// `tee-wire` stays dependency-light; the numeric values are the fixed
// Linux x86_64/aarch64 errno values used throughout the original source.
const fn libc_einval() -> i32 {
    22
}
const fn libc_efault() -> i32 {
    14
}
const fn libc_enomem() -> i32 {
    12
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_errnos() {
        let outcome = DriverOutcome {
            errno: -22,
            code: 7,
            origin: 3,
        };
        assert!(matches!(
            outcome.into_tee_error(),
            TeeError::BadParameters {
                code: Some(7),
                origin: Some(3)
            }
        ));

        let outcome = DriverOutcome {
            errno: -14,
            ..Default::default()
        };
        assert!(matches!(outcome.into_tee_error(), TeeError::AccessDenied { .. }));

        let outcome = DriverOutcome {
            errno: -12,
            ..Default::default()
        };
        assert!(matches!(outcome.into_tee_error(), TeeError::OutOfMemory { .. }));
    }

    #[test]
    fn unknown_errno_maps_to_generic() {
        let outcome = DriverOutcome {
            errno: -5,
            ..Default::default()
        };
        assert!(matches!(
            outcome.into_tee_error(),
            TeeError::Generic { errno: -5, .. }
        ));
    }
}
