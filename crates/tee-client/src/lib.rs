//! Context, session, and shared-memory runtime for Client Applications
//! talking to Trusted Applications.
//!
//! Builds on [`tee_driver`]'s raw ioctl binding with the policy layer a
//! CA actually wants: typed parameter marshalling ([`marshal`]),
//! refcounted shared-memory blocks ([`shm`]), a generation-checked
//! handle registry for contexts and sessions ([`registry`]), pooled
//! session reuse ([`pool`]), and an explicit [`Runtime`] value tying
//! them together instead of process-global state.

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

mod arena;
pub mod marshal;
pub mod pool;
pub mod registry;
pub mod runtime;
pub mod shm;

pub use arena::{Arena, Handle};
pub use pool::SessionPool;
pub use registry::{Context, SessionHandle, SessionSource};
pub use runtime::Runtime;
pub use shm::{IdBitmap, SharedMemFlags, SharedMemoryBlock, SharedMemoryHandle};
