//! An open handle to a TEE kernel character device.

use std::os::unix::io::{AsRawFd, RawFd};

use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::close;
use tee_wire::client::ClientContext;
use tee_wire::error::DriverOutcome;

use crate::ioctl;
use crate::types::{AgentIoctlArgs, SecLoadIoctlArgs, TeeInfo, TeeTime};

/// Path to the main client-facing TEE device node.
pub const CLIENT_DEV_PATH: &str = "/dev/tc_ns_client";

/// Path to the privileged device node only `teecd` is expected to open
/// (agent registration, TA loading, system-time sync).
pub const PRIVATE_DEV_PATH: &str = "/dev/tc_private";

/// An open file descriptor to a TEE character device, with one typed
/// method per ioctl the driver exposes.
///
/// Grounded on the ioctl call sites scattered through
/// `original_source/src/libteec_vendor/tee_client_api.c` and
/// `original_source/src/teecd/tee_ca_daemon.c`; here they are collected
/// behind a single handle type instead of being issued ad hoc.
#[derive(Debug)]
pub struct DeviceHandle {
    fd: RawFd,
}

impl DeviceHandle {
    /// Open a device node read-write.
    pub fn open(path: &str) -> nix::Result<Self> {
        let fd = open(path, OFlag::O_RDWR, Mode::empty())?;
        Ok(DeviceHandle { fd })
    }

    fn outcome_from(result: nix::Result<i32>, returns: impl FnOnce() -> DriverOutcome) -> DriverOutcome {
        match result {
            Ok(_) => DriverOutcome::SUCCESS,
            Err(e) => {
                let mut outcome = returns();
                outcome.errno = -(e as i32);
                outcome
            }
        }
    }

    /// Issue `TC_NS_CLIENT_IOCTL_SES_OPEN_REQ`.
    pub fn open_session(&self, ctx: &mut ClientContext) -> DriverOutcome {
        let result = unsafe { ioctl::ioctl_open_session(self.fd, ctx as *mut ClientContext) };
        Self::outcome_from(result, || ctx.returns.into_outcome(0))
    }

    /// Issue `TC_NS_CLIENT_IOCTL_SES_CLOSE_REQ`.
    pub fn close_session(&self, ctx: &mut ClientContext) -> DriverOutcome {
        let result = unsafe { ioctl::ioctl_close_session(self.fd, ctx as *mut ClientContext) };
        Self::outcome_from(result, || ctx.returns.into_outcome(0))
    }

    /// Issue `TC_NS_CLIENT_IOCTL_SEND_CMD_REQ`.
    pub fn send_cmd(&self, ctx: &mut ClientContext) -> DriverOutcome {
        let result = unsafe { ioctl::ioctl_send_cmd(self.fd, ctx as *mut ClientContext) };
        Self::outcome_from(result, || ctx.returns.into_outcome(0))
    }

    /// Issue `TC_NS_CLIENT_IOCTL_CANCEL_CMD_REQ`.
    pub fn cancel_cmd(&self, ctx: &mut ClientContext) -> DriverOutcome {
        let result = unsafe { ioctl::ioctl_cancel_cmd(self.fd, ctx as *mut ClientContext) };
        Self::outcome_from(result, || ctx.returns.into_outcome(0))
    }

    /// Issue `TC_NS_CLIENT_IOCTL_SHRD_MEM_RELEASE` with the shared-memory
    /// block's id.
    pub fn release_shared_mem(&self, shared_mem_id: &mut u32) -> DriverOutcome {
        let result = unsafe { ioctl::ioctl_release_shared_mem(self.fd, shared_mem_id as *mut u32) };
        Self::outcome_from(result, DriverOutcome::default)
    }

    /// Issue `TC_NS_CLIENT_IOCTL_WAIT_EVENT` for the given agent id,
    /// blocking until the TEE issues an upcall or the session is torn
    /// down from under the agent thread.
    pub fn wait_event(&self, agent_id: &mut u32) -> DriverOutcome {
        let result = unsafe { ioctl::ioctl_wait_event(self.fd, agent_id as *mut u32) };
        Self::outcome_from(result, DriverOutcome::default)
    }

    /// Issue `TC_NS_CLIENT_IOCTL_SEND_EVENT_RESPONSE` to wake the TEE
    /// back up after an agent has filled in its reply.
    pub fn send_event_response(&self, agent_id: &mut u32) -> DriverOutcome {
        let result = unsafe { ioctl::ioctl_send_event_response(self.fd, agent_id as *mut u32) };
        Self::outcome_from(result, DriverOutcome::default)
    }

    /// Issue `TC_NS_CLIENT_IOCTL_REGISTER_AGENT`.
    pub fn register_agent(&self, args: &mut AgentIoctlArgs) -> DriverOutcome {
        let result = unsafe { ioctl::ioctl_register_agent(self.fd, args as *mut AgentIoctlArgs) };
        Self::outcome_from(result, DriverOutcome::default)
    }

    /// Issue `TC_NS_CLIENT_IOCTL_UNREGISTER_AGENT`.
    pub fn unregister_agent(&self, agent_id: &mut u32) -> DriverOutcome {
        let result = unsafe { ioctl::ioctl_unregister_agent(self.fd, agent_id as *mut u32) };
        Self::outcome_from(result, DriverOutcome::default)
    }

    /// Issue `TC_NS_CLIENT_IOCTL_LOAD_APP_REQ` (shared by `LOAD_APP` and
    /// `LOAD_LIB`, distinguished by `args.file_info.file_type`).
    pub fn load_app(&self, args: &mut SecLoadIoctlArgs) -> DriverOutcome {
        let result = unsafe { ioctl::ioctl_load_app(self.fd, args as *mut SecLoadIoctlArgs) };
        Self::outcome_from(result, DriverOutcome::default)
    }

    /// Issue `TC_NS_CLIENT_IOCTL_LOGIN` with a pre-assembled identity
    /// descriptor (spec §6 `SET_LOGIN_IDENTITY{buf}`). Broker-only: the
    /// identity must be installed before the CA's first invocation.
    pub fn set_login_identity(&self, identity_buf: &[u8]) -> DriverOutcome {
        let result = unsafe { ioctl::ioctl_set_login_identity(self.fd, identity_buf) };
        Self::outcome_from(result, DriverOutcome::default)
    }

    /// Issue `TC_NS_CLIENT_IOCTL_SYC_SYS_TIME`.
    pub fn sync_sys_time(&self, time: &mut TeeTime) -> DriverOutcome {
        let result = unsafe { ioctl::ioctl_sync_sys_time(self.fd, time as *mut TeeTime) };
        Self::outcome_from(result, DriverOutcome::default)
    }

    /// Issue `TC_NS_CLIENT_IOCTL_GET_TEE_VERSION`.
    pub fn get_tee_version(&self, version: &mut u32) -> DriverOutcome {
        let result = unsafe { ioctl::ioctl_get_tee_version(self.fd, version as *mut u32) };
        Self::outcome_from(result, DriverOutcome::default)
    }

    /// Issue `TC_NS_CLIENT_IOCTL_GET_TEE_INFO`.
    pub fn get_tee_info(&self, info: &mut TeeInfo) -> DriverOutcome {
        let result = unsafe { ioctl::ioctl_get_tee_info(self.fd, info as *mut TeeInfo) };
        Self::outcome_from(result, DriverOutcome::default)
    }
}

impl AsRawFd for DeviceHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if let Err(e) = close(self.fd) {
            tracing::warn!(fd = self.fd, error = %e, "failed to close TEE device fd");
        }
    }
}
