//! Shared-memory ring-queue transport ("blocking queue") and the tasklet
//! worker pool built on top of it, used to carry cross-domain POSIX calls
//! between the TEE and the host without an extra round trip through the
//! kernel driver (spec §4.H).

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

pub mod error;
pub mod queue;
pub mod thread_pool;
pub mod xtasklet;

pub use error::{QueueError, Result};
pub use queue::BlockingQueue;
pub use thread_pool::ThreadPool;
pub use xtasklet::{TaskHandler, TaskHeader, Xtasklet, XtaskletMemory, XTASK_BUF_MAGIC};
