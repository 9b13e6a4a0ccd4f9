//! Host-side upcall handlers servicing the TEE's agent channels: the
//! filesystem agent, the misc agent, and the secure-image loader (spec
//! §4.G).
//!
//! Each agent pairs a protocol-specific `dispatch` (this crate) with the
//! shared register/wait/respond loop in [`channel`]. `tee-posix-proxy`
//! and `bin/teecd` own the decision of which agents to start and on which
//! threads; this crate only knows how to answer one request at a time
//! once handed a control buffer.

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

pub mod channel;
pub mod error;
pub mod fs;
pub mod misc;
pub mod seclib;

pub use channel::{AgentChannel, TRANS_BUFF_SIZE};
pub use error::{AgentError, Result};
pub use fs::FsAgent;
pub use misc::MiscAgent;
pub use seclib::SeclibAgent;

/// Well-known agent ids the driver's `REGISTER_AGENT`/`WAIT_EVENT` ioctls
/// key on (`AGENT_FS_ID`, `AGENT_MISC_ID`, `SECFILE_LOAD_AGENT_ID`).
pub mod ids {
    /// Filesystem agent (`AGENT_FS_ID`, ASCII `"FSfs"` packed little-endian).
    pub const FS: u32 = 0x4653_6673;
    /// Misc agent (`"MISC"`).
    pub const MISC: u32 = 0x4d49_5343;
    /// Secure-image loader agent (`"LOAD"`).
    pub const SECFILE_LOAD: u32 = 0x4c4f_4144;
}
