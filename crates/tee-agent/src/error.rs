//! Error taxonomy for agent registration and channel servicing.

use thiserror::Error;

/// Failures an agent can hit registering with, or servicing, the driver.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Opening or ioctl-ing the device node failed.
    #[error("device error: {0}")]
    Device(#[from] nix::Error),
    /// `REGISTER_AGENT` succeeded but returned a null shared buffer.
    #[error("agent {0:#x} registered with a null shared buffer")]
    NullSharedBuffer(u32),
    /// `WAIT_EVENT` or `SEND_EVENT_RESPONSE` reported a driver-side failure.
    #[error("agent {id:#x} ioctl {step} failed, errno {errno}")]
    IoctlFailed {
        /// Agent identifier.
        id: u32,
        /// Which step failed (`"wait_event"`/`"send_event_response"`).
        step: &'static str,
        /// Raw errno reported by the driver.
        errno: i32,
    },
    /// A control-buffer field failed validation before being acted on.
    #[error("malformed agent request: {0}")]
    MalformedRequest(&'static str),
    /// Filesystem operation requested against a resolved path failed.
    #[error("filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),
    /// A path did not resolve to a location under the storage roots this
    /// agent is willing to touch.
    #[error("path rejected: {0}")]
    PathRejected(String),
    /// An unknown file descriptor was used in a read/write/seek/close/fsync.
    #[error("unknown file handle {0}")]
    UnknownHandle(i32),
    /// A secure-image load request referenced a path outside the
    /// configured dynamic TA directory, or with the wrong suffix.
    #[error("secure image path rejected: {0}")]
    SecureImageRejected(String),
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AgentError>;
