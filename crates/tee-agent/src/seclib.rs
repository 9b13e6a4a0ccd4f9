//! The secure-image loader agent: on a `LOAD_APP`/`LOAD_LIB` upcall, reads
//! a `.sec`-suffixed TA or driver-library image off the host filesystem
//! and streams it into the driver.
//!
//! Grounded on `original_source/src/teecd/secfile_load_agent.{h,c}` and
//! `src/libteec_vendor/tee_load_sec_file.c` (`LoadSecFile`). The dynamic-TA
//! directory (`DYNAMIC_TA_PATH` in the original, defined in a
//! product-specific header not carried into this pack) is kept as a
//! configurable field rather than a hardcoded constant, the same
//! redesign `tee-agent::fs::paths::StorageRoots` already applies to its
//! two storage roots.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tee_driver::{DeviceHandle, SecFileInfo, SecFileType, SecLoadIoctlArgs};
use tee_wire::{Uuid, H_OFFSET};

use crate::error::{AgentError, Result};

/// Bytes of `Args.{ServiceSec,LibSec}.{serviceName,libName}`
/// (`MAX_SEC_FILE_NAME_LEN`).
pub const MAX_SEC_FILE_NAME_LEN: usize = 32;
/// Largest image `LoadSecFile` will stage in memory (`MAX_BUFFER_LEN`).
pub const MAX_BUFFER_LEN: usize = 8 * 1024 * 1024;
/// Extension every secure image must carry (`realPathSuffix` check).
pub const SEC_FILE_SUFFIX: &str = ".sec";

const HEADER_LEN: usize = 16; // cmd: u32, magic: u32, ret: i32, error: i32
const UUID_OFF: usize = HEADER_LEN;
const NAME_OFF: usize = HEADER_LEN + 16;

/// `SecAgentCmd` — selects which union arm of the control buffer applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SecLoadCmd {
    /// Load a Trusted Application image, named from its UUID alone.
    LoadTa = 0,
    /// Load a TEE system-service image (out of core scope; rejected).
    LoadService = 1,
    /// Load a driver-library image, named from a TA-supplied suffix.
    LoadLib = 2,
}

impl SecLoadCmd {
    fn from_u32(v: u32) -> Result<Self> {
        match v {
            0 => Ok(SecLoadCmd::LoadTa),
            1 => Ok(SecLoadCmd::LoadService),
            2 => Ok(SecLoadCmd::LoadLib),
            other => Err(AgentError::MalformedRequest(Box::leak(
                format!("unknown secfile load cmd {other}").into_boxed_str(),
            ))),
        }
    }
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_ne_bytes(buf[off..off + 4].try_into().unwrap())
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_ne_bytes(buf[off..off + 2].try_into().unwrap())
}

fn set_ret(buf: &mut [u8], ret: i32) {
    buf[8..12].copy_from_slice(&ret.to_ne_bytes());
}

fn set_error(buf: &mut [u8], errno: i32) {
    buf[12..16].copy_from_slice(&errno.to_ne_bytes());
}

/// Read the 16-byte `TEEC_UUID` at `off`: a native-endian `repr(C)` struct
/// reinterpretation, not [`Uuid::from_bytes`]'s big-endian wire parse —
/// the control buffer carries the struct as the TEE wrote it in memory,
/// not as bytes off a serialized wire.
fn read_uuid(buf: &[u8], off: usize) -> Uuid {
    Uuid {
        time_low: read_u32(buf, off),
        time_mid: read_u16(buf, off + 4),
        time_hi_and_version: read_u16(buf, off + 6),
        clock_seq_and_node: buf[off + 8..off + 16].try_into().unwrap(),
    }
}

fn read_name(buf: &[u8]) -> Result<String> {
    let bytes = buf
        .get(NAME_OFF..NAME_OFF + MAX_SEC_FILE_NAME_LEN)
        .ok_or(AgentError::MalformedRequest("name field runs past the control buffer"))?;
    let nul = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    if nul >= MAX_SEC_FILE_NAME_LEN {
        return Err(AgentError::MalformedRequest("libName/serviceName is not NUL-terminated"));
    }
    std::str::from_utf8(&bytes[..nul])
        .map(str::to_owned)
        .map_err(|_| AgentError::MalformedRequest("libName/serviceName is not valid UTF-8"))
}

fn all_zero_uuid(uuid: &Uuid) -> bool {
    uuid.time_low == 0
        && uuid.time_mid == 0
        && uuid.time_hi_and_version == 0
        && uuid.clock_seq_and_node == [0u8; 8]
}

/// Streams `.sec` TA/driver-library images from a fixed directory into the
/// driver's `LOAD_APP`/`LOAD_LIB` ioctl.
pub struct SeclibAgent {
    dir: PathBuf,
}

impl SeclibAgent {
    /// Construct an agent that resolves images under `dynamic_ta_dir`
    /// (`DYNAMIC_TA_PATH`).
    pub fn new(dynamic_ta_dir: impl Into<PathBuf>) -> Self {
        SeclibAgent { dir: dynamic_ta_dir.into() }
    }

    /// Dispatch one control-buffer request in place (`SecLoadAgentWork`).
    pub fn dispatch(&self, handle: &DeviceHandle, control: &mut [u8]) {
        if control.len() < NAME_OFF {
            tracing::warn!("secfile load agent control buffer shorter than its header+uuid");
            return;
        }
        let cmd = match SecLoadCmd::from_u32(read_u32(control, 0)) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "malformed secfile load agent request");
                set_ret(control, -1);
                return;
            }
        };

        match cmd {
            SecLoadCmd::LoadTa => self.load_ta(handle, control),
            SecLoadCmd::LoadLib => self.load_lib(handle, control),
            SecLoadCmd::LoadService => {
                tracing::warn!("gtask agent error cmd: LoadService is unsupported in this core");
                set_ret(control, -1);
            }
        }
    }

    fn load_ta(&self, handle: &DeviceHandle, control: &mut [u8]) {
        let uuid = read_uuid(control, UUID_OFF);
        let path = self.dir.join(format!("{uuid}{SEC_FILE_SUFFIX}"));
        match self.load_sec_file(handle, &path, SecFileType::LoadApp, Some(uuid)) {
            Ok(()) => set_ret(control, 0),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "teec load TA app failed");
                set_ret(control, -1);
                set_error(control, errno_of(&e));
            }
        }
    }

    fn load_lib(&self, handle: &DeviceHandle, control: &mut [u8]) {
        let uuid = read_uuid(control, UUID_OFF);
        let name = match read_name(control) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "libName is too long or malformed");
                set_ret(control, -1);
                return;
            }
        };
        let path = if all_zero_uuid(&uuid) {
            self.dir.join(format!("{name}{SEC_FILE_SUFFIX}"))
        } else {
            self.dir.join(format!("{uuid}{name}{SEC_FILE_SUFFIX}"))
        };
        match self.load_sec_file(handle, &path, SecFileType::LoadLib, None) {
            Ok(()) => set_ret(control, 0),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "teec load app failed");
                set_ret(control, -1);
                set_error(control, errno_of(&e));
            }
        }
    }

    /// `LoadSecFile`: validate `path` resolves under `self.dir` with a
    /// `.sec` suffix, read the whole image into a heap buffer (bounded by
    /// [`MAX_BUFFER_LEN`]), and hand it to the driver's `LOAD_APP` ioctl.
    fn load_sec_file(
        &self,
        handle: &DeviceHandle,
        path: &Path,
        file_type: SecFileType,
        uuid: Option<Uuid>,
    ) -> Result<()> {
        let real_path = validate_sec_path(path, &self.dir)?;
        let buffer = read_sec_image(&real_path)?;

        let addr = buffer.as_ptr() as u64;
        let mut args = SecLoadIoctlArgs {
            file_info: SecFileInfo {
                file_type,
                file_addr_low: addr as u32,
                file_addr_high: (addr >> H_OFFSET) as u32,
                file_size: buffer.len() as u32,
            },
            uuid: uuid.unwrap_or(Uuid {
                time_low: 0,
                time_mid: 0,
                time_hi_and_version: 0,
                clock_seq_and_node: [0; 8],
            }),
        };
        let outcome = handle.load_app(&mut args);
        drop(buffer);
        if !outcome.ioctl_succeeded() {
            return Err(nix::Error::from_raw(-outcome.errno).into());
        }
        Ok(())
    }
}

/// Resolve `path` and reject it unless it is a `.sec`-suffixed file under
/// `dir` (the realpath + suffix + prefix checks `SecFileLoadWork` runs
/// before ever opening the file).
fn validate_sec_path(path: &Path, dir: &Path) -> Result<PathBuf> {
    let real_path = path
        .canonicalize()
        .map_err(|_| AgentError::SecureImageRejected(format!("{} does not resolve", path.display())))?;
    if real_path.extension().and_then(|e| e.to_str()) != Some("sec") {
        return Err(AgentError::SecureImageRejected(format!(
            "{} does not have a .sec suffix",
            real_path.display()
        )));
    }
    if !real_path.starts_with(dir) {
        return Err(AgentError::SecureImageRejected(format!(
            "{} resolves outside the configured dynamic TA directory",
            real_path.display()
        )));
    }
    Ok(real_path)
}

/// Read `path` fully into a heap buffer, bounded by [`MAX_BUFFER_LEN`]
/// (`GetImgLen` + the `malloc`/`fread` pair in `LoadSecFile`).
fn read_sec_image(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len == 0 || len as usize > MAX_BUFFER_LEN {
        return Err(AgentError::SecureImageRejected(format!(
            "{} size {len} is zero or exceeds the {MAX_BUFFER_LEN}-byte limit",
            path.display()
        )));
    }
    let mut buffer = vec![0u8; len as usize];
    file.read_exact(&mut buffer)?;
    Ok(buffer)
}

fn errno_of(e: &AgentError) -> i32 {
    match e {
        AgentError::Device(errno) => *errno as i32,
        AgentError::Io(io) => io.raw_os_error().unwrap_or(libc::EIO),
        _ => libc::EIO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_request(cmd: SecLoadCmd, uuid: Uuid, name: &str) -> Vec<u8> {
        let mut buf = vec![0u8; NAME_OFF + MAX_SEC_FILE_NAME_LEN];
        buf[0..4].copy_from_slice(&(cmd as u32).to_ne_bytes());
        buf[UUID_OFF..UUID_OFF + 4].copy_from_slice(&uuid.time_low.to_ne_bytes());
        buf[UUID_OFF + 4..UUID_OFF + 6].copy_from_slice(&uuid.time_mid.to_ne_bytes());
        buf[UUID_OFF + 6..UUID_OFF + 8].copy_from_slice(&uuid.time_hi_and_version.to_ne_bytes());
        buf[UUID_OFF + 8..UUID_OFF + 16].copy_from_slice(&uuid.clock_seq_and_node);
        buf[NAME_OFF..NAME_OFF + name.len()].copy_from_slice(name.as_bytes());
        buf
    }

    #[test]
    fn rejects_an_image_outside_the_dynamic_ta_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let image = outside.path().join("evil.sec");
        fs::write(&image, b"payload").unwrap();

        let err = validate_sec_path(&image, tmp.path()).unwrap_err();
        assert!(matches!(err, AgentError::SecureImageRejected(_)));
    }

    #[test]
    fn rejects_a_non_sec_suffix() {
        let tmp = tempfile::tempdir().unwrap();
        let image = tmp.path().join("not_sec.bin");
        fs::write(&image, b"payload").unwrap();
        let err = validate_sec_path(&image, tmp.path()).unwrap_err();
        assert!(matches!(err, AgentError::SecureImageRejected(_)));
    }

    #[test]
    fn accepts_and_reads_a_valid_sec_image_under_the_dynamic_ta_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let image = tmp.path().join("abcdefab-0000-0000-0000-000000000000.sec");
        fs::write(&image, b"fake-ta-image").unwrap();
        let real = validate_sec_path(&image, tmp.path()).unwrap();
        let buf = read_sec_image(&real).unwrap();
        assert_eq!(buf, b"fake-ta-image");
    }

    #[test]
    fn rejects_an_empty_image() {
        let tmp = tempfile::tempdir().unwrap();
        let image = tmp.path().join("empty.sec");
        fs::write(&image, b"").unwrap();
        let real = validate_sec_path(&image, tmp.path()).unwrap();
        assert!(read_sec_image(&real).is_err());
    }

    #[test]
    fn read_name_rejects_an_un_terminated_field() {
        let mut buf = vec![0u8; NAME_OFF + MAX_SEC_FILE_NAME_LEN];
        buf[NAME_OFF..].fill(b'a');
        assert!(read_name(&buf).is_err());
    }

    #[test]
    fn write_request_round_trips_the_uuid() {
        let uuid = Uuid { time_low: 1, time_mid: 2, time_hi_and_version: 3, clock_seq_and_node: [4; 8] };
        let buf = write_request(SecLoadCmd::LoadTa, uuid, "");
        assert_eq!(read_uuid(&buf, UUID_OFF), uuid);
    }
}
