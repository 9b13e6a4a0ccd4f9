//! Thin, typed binding to the TEE kernel character devices.
//!
//! This crate owns exactly one concern: turning `ioctl(2)` calls against
//! `/dev/tc_ns_client` and `/dev/tc_private` into typed Rust calls that
//! return a [`tee_wire::DriverOutcome`]. It knows nothing about session
//! pooling, marshalling policy, or agent dispatch — those live in
//! `tee-client` and `tee-agent`.

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

mod device;
mod ioctl;
mod types;

pub use device::{DeviceHandle, CLIENT_DEV_PATH, PRIVATE_DEV_PATH};
pub use types::{AgentIoctlArgs, SecFileInfo, SecFileType, SecLoadIoctlArgs, TeeInfo, TeeTime};
