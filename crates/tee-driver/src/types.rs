//! Ioctl argument structs that have no counterpart in `tee-wire` because
//! they are private to the driver boundary (agent registration, TA
//! loading, version/time queries).
//!
//! Grounded on `original_source/src/inc/tc_ns_client.h`'s
//! `AgentIoctlArgs`, `SecLoadIoctlStruct`, `TC_NS_Time`, and
//! `TC_NS_TEE_Info`.

use tee_wire::Uuid;

/// Arguments for `TC_NS_CLIENT_IOCTL_REGISTER_AGENT` /
/// `TC_NS_CLIENT_IOCTL_PORTAL_REGISTER`: an agent id paired with a shared
/// buffer the driver maps into both the CA and the TEE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct AgentIoctlArgs {
    /// Agent identifier, matched against the command ids the TEE issues
    /// on the agent's upcall channel.
    pub id: u32,
    /// Size in bytes of the shared buffer.
    pub buffer_size: u32,
    /// Low 32 bits of the shared buffer's address.
    pub addr_low: u32,
    /// High 32 bits of the shared buffer's address.
    pub addr_high: u32,
}

/// File-identifying half of [`SecLoadIoctlArgs`] (`SecFileInfo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SecFileInfo {
    /// One of [`SecFileType`], distinguishing a TA image from a driver
    /// library image sharing the same ioctl.
    pub file_type: SecFileType,
    /// Low 32 bits of the file buffer's address.
    pub file_addr_low: u32,
    /// High 32 bits of the file buffer's address.
    pub file_addr_high: u32,
    /// Length of the file buffer in bytes.
    pub file_size: u32,
}

/// Which kind of secure image a [`SecLoadIoctlArgs`] carries
/// (`enum SecFileType`). `LOAD_APP`/`LOAD_LIB` in spec §4.G/§6 share this
/// one ioctl, distinguished only by this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SecFileType {
    /// A Trusted Application image.
    LoadApp = 0,
    /// A TEE system service image.
    LoadService = 1,
    /// A dynamically-loaded driver library image.
    LoadLib = 2,
    /// A dynamic driver image (out of core scope, kept for ABI parity).
    LoadDynamicDriver = 3,
    /// A TA patch image.
    LoadPatch = 4,
}

/// Arguments for `TC_NS_CLIENT_IOCTL_LOAD_APP_REQ`: stage a TA image the
/// driver should load before the next `OPEN_SESSION` for its uuid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SecLoadIoctlArgs {
    /// Location and size of the TA image.
    pub file_info: SecFileInfo,
    /// Identifier of the TA the image implements.
    pub uuid: Uuid,
}

/// Host wall-clock time pushed into the TEE (`TC_NS_Time`).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct TeeTime {
    /// Seconds since the Unix epoch.
    pub seconds: u64,
    /// Nanoseconds within the current second.
    pub nanoseconds: u32,
}

/// Platform/version identification returned by
/// `TC_NS_CLIENT_IOCTL_GET_TEE_INFO` (`TC_NS_TEE_Info`).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct TeeInfo {
    /// Trusted OS major version.
    pub version_major: u32,
    /// Trusted OS minor version.
    pub version_minor: u32,
    /// Platform-specific feature bitmap.
    pub features: u32,
}
