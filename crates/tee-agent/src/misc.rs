//! The misc agent: bootloader-lock NV status and host wall-clock queries a
//! TA can ask for without a dedicated agent of their own.
//!
//! Grounded on `original_source/src/teecd/misc_work_agent.{h,c}`
//! (`struct MiscControlType`, `MiscWorkThread`, `GetTimeWork`). NV info
//! (`SEC_NV_INFO`) is a no-op in the original beyond a trace line — the
//! bootloader-lock NV partition it reads is a product-specific integration
//! point out of this crate's scope (spec §1) — so this agent reports
//! success without touching `NvInfo.bootloaderInfo`, matching that
//! behaviour.

use std::io::Write as _;

use crate::error::{AgentError, Result};

/// Bytes of `Args.NvInfo.bootloaderInfo` (`WIDEVINE_NV_WVLOCK_SIZE`).
pub const NV_WVLOCK_SIZE: usize = 68;
/// Bytes of `Args.GetTime.timeStr` (`MISC_CONTROL_TIME_STR_LEN`).
pub const TIME_STR_LEN: usize = 30;

const HEADER_LEN: usize = 12; // cmd: u32, ret: i32, magic: i32
const ARGS_OFF: usize = HEADER_LEN;

/// `MiscCmdType` — selects which `Args` arm of the control buffer applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MiscCmd {
    /// Bootloader-lock status kept in the NV partition.
    NvInfo = 0,
    /// Host wall-clock time, for a TA that needs a rough time source.
    GetTimeOfDay = 1,
}

impl MiscCmd {
    fn from_u32(v: u32) -> Result<Self> {
        match v {
            0 => Ok(MiscCmd::NvInfo),
            1 => Ok(MiscCmd::GetTimeOfDay),
            other => Err(AgentError::MalformedRequest(Box::leak(
                format!("unknown misc cmd {other}").into_boxed_str(),
            ))),
        }
    }
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_ne_bytes(buf[off..off + 4].try_into().unwrap())
}

fn set_ret(buf: &mut [u8], ret: i32) {
    buf[4..8].copy_from_slice(&ret.to_ne_bytes());
}

/// The misc agent: no per-instance state, every request is answered from
/// host-global sources (the NV partition stub, the system clock).
#[derive(Debug, Default, Clone, Copy)]
pub struct MiscAgent;

impl MiscAgent {
    /// Dispatch one control-buffer request in place (`MiscWorkThread`'s
    /// per-iteration body, minus the ioctl wait/respond which
    /// [`crate::channel::AgentChannel::run`] drives).
    pub fn dispatch(&self, control: &mut [u8]) {
        if control.len() < HEADER_LEN {
            tracing::warn!("misc agent control buffer shorter than its header");
            return;
        }
        let cmd = match MiscCmd::from_u32(read_u32(control, 0)) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "malformed misc agent request");
                set_ret(control, -1);
                return;
            }
        };

        match cmd {
            MiscCmd::NvInfo => {
                tracing::trace!("sec nv info access");
                set_ret(control, 0);
            }
            MiscCmd::GetTimeOfDay => {
                tracing::trace!("sec get time of day");
                self.get_time_work(control);
            }
        }
    }

    fn get_time_work(&self, buf: &mut [u8]) {
        let mut tv = libc::timeval { tv_sec: 0, tv_usec: 0 };
        // SAFETY: `tv` is a valid, exclusively-owned `timeval` for the
        // duration of this call.
        let rc = unsafe { libc::gettimeofday(&mut tv, std::ptr::null_mut()) };
        if rc != 0 {
            set_ret(buf, -1);
            buf[ARGS_OFF..ARGS_OFF + 4].copy_from_slice(&0u32.to_ne_bytes());
            buf[ARGS_OFF + 4..ARGS_OFF + 8].copy_from_slice(&0u32.to_ne_bytes());
            return;
        }

        let seconds = tv.tv_sec as u32;
        let millis = (tv.tv_usec / 1000) as u32;
        buf[ARGS_OFF..ARGS_OFF + 4].copy_from_slice(&seconds.to_ne_bytes());
        buf[ARGS_OFF + 4..ARGS_OFF + 8].copy_from_slice(&millis.to_ne_bytes());

        let mut tm: libc::tm = unsafe { std::mem::zeroed() };
        let sec = tv.tv_sec;
        // SAFETY: `tm` is a valid, exclusively-owned `tm` for this call.
        let localtime_ok = unsafe { !libc::localtime_r(&sec, &mut tm).is_null() };

        let str_off = ARGS_OFF + 8;
        let str_len = TIME_STR_LEN.min(buf.len().saturating_sub(str_off));
        let slot = &mut buf[str_off..str_off + str_len];
        slot.fill(0);
        if localtime_ok {
            let rendered = format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{millis:03} ",
                tm.tm_year + 1900,
                tm.tm_mon + 1,
                tm.tm_mday,
                tm.tm_hour,
                tm.tm_min,
                tm.tm_sec,
            );
            let bytes = rendered.as_bytes();
            let n = bytes.len().min(str_len.saturating_sub(1));
            let _ = (&mut slot[..n]).write_all(&bytes[..n]);
        } else {
            tracing::warn!("localtime_r failed while servicing misc get-time-of-day");
        }
        set_ret(buf, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf() -> Vec<u8> {
        vec![0u8; ARGS_OFF + NV_WVLOCK_SIZE]
    }

    #[test]
    fn nv_info_reports_success_without_touching_state() {
        let agent = MiscAgent;
        let mut b = buf();
        b[0..4].copy_from_slice(&(MiscCmd::NvInfo as u32).to_ne_bytes());
        agent.dispatch(&mut b);
        assert_eq!(i32::from_ne_bytes(b[4..8].try_into().unwrap()), 0);
    }

    #[test]
    fn get_time_of_day_fills_seconds_millis_and_a_rendered_string() {
        let agent = MiscAgent;
        let mut b = buf();
        b[0..4].copy_from_slice(&(MiscCmd::GetTimeOfDay as u32).to_ne_bytes());
        agent.dispatch(&mut b);
        assert_eq!(i32::from_ne_bytes(b[4..8].try_into().unwrap()), 0);
        let seconds = read_u32(&b, ARGS_OFF);
        assert!(seconds > 0);
        let str_bytes = &b[ARGS_OFF + 8..ARGS_OFF + 8 + TIME_STR_LEN];
        let nul = str_bytes.iter().position(|&c| c == 0).unwrap_or(str_bytes.len());
        let rendered = std::str::from_utf8(&str_bytes[..nul]).unwrap();
        assert!(rendered.contains('-') && rendered.contains(':'));
    }

    #[test]
    fn unknown_command_is_rejected() {
        let agent = MiscAgent;
        let mut b = buf();
        b[0..4].copy_from_slice(&99u32.to_ne_bytes());
        agent.dispatch(&mut b);
        assert_eq!(i32::from_ne_bytes(b[4..8].try_into().unwrap()), -1);
    }
}
