//! The authentication broker: a Unix-socket daemon that authenticates
//! connecting CAs and vends them a logged-in TEE driver file descriptor
//! (spec §4.F), plus the CA-side connector used to reach it.

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

pub mod client;
mod error;
pub mod identity;
pub mod login;
pub mod protocol;
pub mod server;

pub use error::{BrokerError, Result};
pub use server::{Broker, BrokerConfig, SocketAddrKind, PROTOCOL_MAJOR, PROTOCOL_MINOR};
