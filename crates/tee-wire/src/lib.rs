//! Wire-level types shared by every crate in the TEE client stack.
//!
//! Nothing here talks to a device or a socket — this crate only defines
//! the byte-for-byte shapes (`#[repr(C)]` structs, packed parameter-type
//! words, the cross-cutting error taxonomy) that the driver binding,
//! client runtime, broker, agents, and POSIX proxy all need to agree on.

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

pub mod client;
pub mod error;
pub mod uuid;

/// Number of parameters in a single [`client::ClientContext`] operation.
pub const PARAM_NUM: usize = 4;

/// Size in bytes of an on-wire UUID.
pub const UUID_SIZE: usize = 16;

/// Bit offset used to split a 64-bit pointer/size into low/high 32-bit
/// halves when writing it into a 32-bit-clean driver struct field.
///
/// Grounded on `original_source/src/libteec_vendor/tee_client_api.c`'s
/// `H_OFFSET` constant.
pub const H_OFFSET: u32 = 32;

pub use error::{DriverOutcome, Result, TeeError};
pub use uuid::Uuid;
