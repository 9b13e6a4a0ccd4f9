//! The register → wait → dispatch → respond loop shared by every agent.
//!
//! Grounded on `original_source/src/teecd/tee_agent.c` (`AgentInit`/
//! `AgentExit`) and the three agents' `*WorkThread` functions, which all
//! share this exact shape: block in `TC_NS_CLIENT_IOCTL_WAIT_EVENT`, run the
//! command found in the shared control buffer, publish the reply with a
//! full fence before the magic word, then `TC_NS_CLIENT_IOCTL_SEND_EVENT_RESPONSE`.

use std::sync::atomic::{fence, Ordering};

use tee_driver::{AgentIoctlArgs, DeviceHandle};

use crate::error::{AgentError, Result};

/// Bytes of shared control buffer requested for an agent registration
/// (`TRANS_BUFF_SIZE`).
pub const TRANS_BUFF_SIZE: u32 = 4 * 1024;

/// A registered agent's shared-memory channel to the TEE.
///
/// The driver maps `buffer_size` bytes into this process's address space as
/// part of handling `REGISTER_AGENT` and hands back its address packed into
/// `addr_low`/`addr_high`; `control` below is that address reassembled.
pub struct AgentChannel {
    handle: DeviceHandle,
    id: u32,
    control: *mut u8,
    control_len: usize,
}

// SAFETY: `control` points at memory the driver keeps mapped for the
// lifetime of the registration and that only this channel's owning thread
// touches between a `wait_event` and the matching `send_event_response`.
unsafe impl Send for AgentChannel {}

impl AgentChannel {
    /// Open `device_path` and register as agent `id` with a `buffer_size`
    /// shared control buffer (`AgentInit`).
    pub fn register(device_path: &str, id: u32, buffer_size: u32) -> Result<Self> {
        let handle = DeviceHandle::open(device_path)?;
        let mut args = AgentIoctlArgs {
            id,
            buffer_size,
            addr_low: 0,
            addr_high: 0,
        };
        let outcome = handle.register_agent(&mut args);
        if !outcome.ioctl_succeeded() {
            return Err(nix::Error::from_raw(-outcome.errno).into());
        }
        let addr = (u64::from(args.addr_high) << 32) | u64::from(args.addr_low);
        if addr == 0 {
            return Err(AgentError::NullSharedBuffer(id));
        }
        Ok(AgentChannel {
            handle,
            id,
            control: addr as *mut u8,
            control_len: buffer_size as usize,
        })
    }

    /// The shared control buffer as a byte slice, valid until this channel
    /// is dropped.
    pub fn control(&self) -> &mut [u8] {
        // SAFETY: see the struct-level invariant; exclusive use is
        // serialized by the wait_event/send_event_response pairing below.
        unsafe { std::slice::from_raw_parts_mut(self.control, self.control_len) }
    }

    /// Run `handle_event(control_buffer)` for every upcall the TEE issues
    /// on this channel, until the driver reports the session is gone.
    /// Intended to be the body of this agent's dedicated `std::thread`.
    pub fn run(&self, mut handle_event: impl FnMut(&mut [u8])) {
        loop {
            let mut agent_id = self.id;
            let outcome = self.handle.wait_event(&mut agent_id);
            if !outcome.ioctl_succeeded() {
                tracing::warn!(id = self.id, errno = outcome.errno, "agent wait_event failed, exiting loop");
                return;
            }

            handle_event(self.control());

            fence(Ordering::SeqCst);

            let mut agent_id = self.id;
            let outcome = self.handle.send_event_response(&mut agent_id);
            if !outcome.ioctl_succeeded() {
                tracing::warn!(id = self.id, errno = outcome.errno, "agent send_event_response failed, exiting loop");
                return;
            }
        }
    }

    /// Unregister this agent (`AgentExit`). Also runs on `Drop`.
    pub fn unregister(self) {
        // Drop performs the unregister; this exists for callers that want
        // the action named explicitly at the call site.
        drop(self);
    }
}

impl Drop for AgentChannel {
    fn drop(&mut self) {
        let mut id = self.id;
        let outcome = self.handle.unregister_agent(&mut id);
        if !outcome.ioctl_succeeded() {
            tracing::warn!(id = self.id, errno = outcome.errno, "unregister_agent failed");
        }
    }
}
