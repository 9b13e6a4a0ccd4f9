//! Context/session lifecycle built on the generation-checked [`Arena`].
//!
//! The original `TEEC_Context` keeps a `TailqHead` of sessions and
//! another of shared-memory blocks threaded through the structs
//! themselves; closing a context walks and frees every node by hand.
//! Here a [`Context`] owns one [`Arena`] of sessions and delegates
//! shared-memory bookkeeping to [`crate::shm`]; dropping the `Context`
//! drops the arena, which drops every session still inside it.

use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use parking_lot::Mutex;
use tee_driver::DeviceHandle;
use tee_wire::client::{ClientContext, ClientLogin};
use tee_wire::error::TeeError;
use tee_wire::Uuid;

use crate::arena::{Arena, Handle};
use crate::marshal::{self, Param};
use crate::shm::{IdBitmap, SharedMemFlags, SharedMemoryBlock};

/// Opaque reference to an open session, valid only for the [`Context`]
/// that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(Handle);

impl SessionHandle {
    /// Wrap a raw arena handle, for [`SessionSource`] implementations
    /// that mint their own sessions (notably test fakes).
    pub(crate) fn from_handle(handle: Handle) -> Self {
        SessionHandle(handle)
    }
}

struct SessionEntry {
    session_id: u32,
    ta_uuid: Uuid,
}

/// An open connection to the TEE, owning one kernel device fd and the
/// sessions opened against it.
///
/// Grounded on `TEEC_InitializeContext`/`TEEC_FinalizeContext` in
/// `original_source/src/libteec_vendor/tee_client_api.c`.
pub struct Context {
    device: DeviceHandle,
    sessions: Mutex<Arena<SessionEntry>>,
    shared_ids: Arc<IdBitmap>,
}

impl Context {
    /// Open the client device and return a fresh, session-less context.
    pub fn initialize(device_path: &str) -> Result<Self, TeeError> {
        let device = DeviceHandle::open(device_path).map_err(|e| TeeError::Generic {
            errno: e as i32,
            origin: None,
            code: None,
        })?;
        Ok(Context {
            device,
            sessions: Mutex::new(Arena::new()),
            shared_ids: Arc::new(IdBitmap::new()),
        })
    }

    /// Bitmap allocator shared by every [`crate::shm::SharedMemoryBlock`]
    /// this context allocates.
    pub fn shared_ids(&self) -> Arc<IdBitmap> {
        self.shared_ids.clone()
    }

    /// Allocate a shared-memory block of `len` bytes (`TEEC_AllocateSharedMemory`).
    ///
    /// Unless `flags` is [`SharedMemFlags::SharedInOut`], the block is
    /// `mmap`'d against this context's own driver fd so the same mapping
    /// can be resolved on the TEE side.
    pub fn allocate_shared_memory(
        &self,
        len: usize,
        flags: SharedMemFlags,
    ) -> Result<SharedMemoryBlock, TeeError> {
        SharedMemoryBlock::allocate(self.shared_ids.clone(), self.device.as_raw_fd(), len, flags)
    }

    /// Open a session against `ta_uuid` with the given login method.
    pub fn open_session(
        &self,
        ta_uuid: Uuid,
        login: ClientLogin,
        params: &mut [Param<'_>; tee_wire::PARAM_NUM],
    ) -> Result<SessionHandle, TeeError> {
        let encoded = marshal::encode(params);
        let mut ctx = ClientContext::new(ta_uuid, 0, login);
        ctx.param_types = encoded.param_types;
        ctx.params = encoded.params;

        let outcome = self.device.open_session(&mut ctx);
        marshal::write_back(params, &ctx.params);
        if !outcome.ioctl_succeeded() {
            return Err(outcome.into_tee_error());
        }
        if outcome.code != 0 {
            return Err(ctx.returns.into_outcome(0).into_tee_error());
        }

        let handle = self.sessions.lock().insert(SessionEntry {
            session_id: ctx.session_id,
            ta_uuid,
        });
        Ok(SessionHandle(handle))
    }

    /// Invoke `cmd_id` against an already-open session.
    pub fn invoke_command(
        &self,
        session: SessionHandle,
        cmd_id: u32,
        params: &mut [Param<'_>; tee_wire::PARAM_NUM],
    ) -> Result<(), TeeError> {
        let (session_id, ta_uuid) = {
            let sessions = self.sessions.lock();
            let entry = sessions.get(session.0).ok_or(TeeError::TargetDead)?;
            (entry.session_id, entry.ta_uuid)
        };

        let encoded = marshal::encode(params);
        let mut ctx = ClientContext::new(ta_uuid, cmd_id, ClientLogin::PUBLIC);
        ctx.session_id = session_id;
        ctx.param_types = encoded.param_types;
        ctx.params = encoded.params;

        let outcome = self.device.send_cmd(&mut ctx);
        marshal::write_back(params, &ctx.params);
        if !outcome.ioctl_succeeded() {
            return Err(outcome.into_tee_error());
        }
        if outcome.code != 0 {
            return Err(ctx.returns.into_outcome(0).into_tee_error());
        }
        Ok(())
    }

    /// Request cancellation of an in-flight command on `session`.
    ///
    /// Best-effort: the TA may complete the command before it observes
    /// the cancellation flag.
    pub fn cancel_command(&self, session: SessionHandle) -> Result<(), TeeError> {
        let (session_id, ta_uuid) = {
            let sessions = self.sessions.lock();
            let entry = sessions.get(session.0).ok_or(TeeError::TargetDead)?;
            (entry.session_id, entry.ta_uuid)
        };
        let mut ctx = ClientContext::new(ta_uuid, 0, ClientLogin::PUBLIC);
        ctx.session_id = session_id;
        let outcome = self.device.cancel_cmd(&mut ctx);
        if !outcome.ioctl_succeeded() {
            return Err(outcome.into_tee_error());
        }
        Ok(())
    }

    /// Close a session and drop it from the registry.
    pub fn close_session(&self, session: SessionHandle) -> Result<(), TeeError> {
        let entry = self
            .sessions
            .lock()
            .remove(session.0)
            .ok_or(TeeError::TargetDead)?;
        let mut ctx = ClientContext::new(entry.ta_uuid, 0, ClientLogin::PUBLIC);
        ctx.session_id = entry.session_id;
        let outcome = self.device.close_session(&mut ctx);
        if !outcome.ioctl_succeeded() {
            return Err(outcome.into_tee_error());
        }
        Ok(())
    }

    /// Number of sessions currently open on this context.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

/// The subset of [`Context`] a [`crate::pool::SessionPool`] drives:
/// opening and invoking sessions against one TA.
///
/// Pulled out so the pool can be exercised against a fake in tests
/// without a real kernel device behind it.
pub trait SessionSource: Send + Sync {
    /// See [`Context::open_session`].
    fn open_session(
        &self,
        ta_uuid: Uuid,
        login: ClientLogin,
        params: &mut [Param<'_>; tee_wire::PARAM_NUM],
    ) -> Result<SessionHandle, TeeError>;

    /// See [`Context::invoke_command`].
    fn invoke_command(
        &self,
        session: SessionHandle,
        cmd_id: u32,
        params: &mut [Param<'_>; tee_wire::PARAM_NUM],
    ) -> Result<(), TeeError>;
}

impl SessionSource for Context {
    fn open_session(
        &self,
        ta_uuid: Uuid,
        login: ClientLogin,
        params: &mut [Param<'_>; tee_wire::PARAM_NUM],
    ) -> Result<SessionHandle, TeeError> {
        Context::open_session(self, ta_uuid, login, params)
    }

    fn invoke_command(
        &self,
        session: SessionHandle,
        cmd_id: u32,
        params: &mut [Param<'_>; tee_wire::PARAM_NUM],
    ) -> Result<(), TeeError> {
        Context::invoke_command(self, session, cmd_id, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closing_unknown_session_reports_target_dead() {
        // Exercises the arena lookup path without a real device; a
        // context is only constructed far enough to hold an empty arena.
        let sessions: Mutex<Arena<SessionEntry>> = Mutex::new(Arena::new());
        let bogus = SessionHandle(Arena::<SessionEntry>::new().insert(SessionEntry {
            session_id: 0,
            ta_uuid: Uuid::from_bytes([0; 16]),
        }));
        assert!(sessions.lock().remove(bogus.0).is_none());
    }
}
