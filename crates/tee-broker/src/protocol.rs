//! Wire shapes exchanged over the broker's `AF_UNIX` socket.
//!
//! Grounded on `original_source/src/authentication/tee_auth_common.h`'s
//! `CaAuthInfo`/`CaRevMsg`/`TEEC_XmlParameter` and
//! `src/libteec_vendor/tee_client_socket.h`'s `RecvTeecdMsg`. The C
//! structs are fixed-size and sent as raw bytes over `sendmsg`/`recvmsg`;
//! this module keeps that shape (rather than introducing a length-prefixed
//! or `serde`-driven encoding) because the broker and every CA process on
//! the machine must agree on the exact byte layout without a shared crate
//! version negotiation step.

use std::mem::size_of;

/// Maximum size of the `certs` field carried in a [`CaAuthInfo`] (`BUF_MAX_SIZE`).
pub const BUF_MAX_SIZE: usize = 4096;

/// Maximum size of an XML descriptor blob carried in a [`Request`]
/// (`HASH_FILE_MAX_SIZE`).
pub const XML_MAX_SIZE: usize = 16 * 1024;

/// The kind of caller connecting to the broker (`CaType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CaKind {
    /// A system-privileged CA.
    System = 1,
    /// A vendor-privileged CA.
    Vendor = 2,
    /// An ordinary application CA.
    App = 3,
}

impl CaKind {
    /// Decode a raw `CaType` value, defaulting to [`CaKind::App`] for any
    /// value the broker does not recognize (never trust a wider
    /// authorization from an unrecognized tag).
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => CaKind::System,
            2 => CaKind::Vendor,
            _ => CaKind::App,
        }
    }
}

/// The command selector a CA sends as the first field of its request
/// (`GET_FD` / `GET_TEEVERSION` / `GET_TEECD_VERSION` / `SET_SYS_XML`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    /// Ask the broker for a logged-in driver file descriptor.
    GetFd = 0,
    /// Ask for the Trusted OS's reported max API level.
    GetTeeVersion = 1,
    /// Ask for the broker's own protocol version (used for the one-time
    /// compatibility probe each client process performs).
    GetTeecdVersion = 2,
    /// Push a signed XML capability descriptor (accepted but not acted on
    /// by the core; see spec §1 Non-goals — credential schemas are
    /// product-specific).
    SetSysXml = 3,
}

impl Command {
    /// Decode a raw command value.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Command::GetFd,
            1 => Command::GetTeeVersion,
            2 => Command::GetTeecdVersion,
            3 => Command::SetSysXml,
            _ => return None,
        })
    }
}

/// Caller credentials gathered from `SO_PEERCRED` plus the CA's declared
/// kind tag (`CaAuthInfo`, minus the `certs` blob which callers attach
/// separately since it is a poor fit for a typed field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaAuthInfo {
    /// Kind tag the CA declares about itself.
    pub kind: CaKind,
    /// Linux uid read from `SO_PEERCRED`.
    pub uid: u32,
    /// Linux pid read from `SO_PEERCRED`.
    pub pid: i32,
    /// Whether the request arrived over the HIDL-facing path.
    pub from_hidl: bool,
}

/// A full request body sent from a CA to the broker.
///
/// On the wire this is `{ command: u32, ca_auth: {certs[4096], kind, uid,
/// pid, from_hidl: u16}, xml_size: u32, xml[16KiB] }`, exactly matching
/// spec §6. `certs`/`xml` are carried as owned buffers here rather than
/// fixed arrays; [`Request::to_wire`]/[`Request::from_wire`] pad/truncate
/// to the fixed on-wire size.
#[derive(Debug, Clone)]
pub struct Request {
    /// Selected operation.
    pub command: Command,
    /// Caller identity.
    pub auth: CaAuthInfo,
    /// Opaque certificate/capability blob the CA attaches (product-defined
    /// schema; the core never parses it).
    pub certs: Vec<u8>,
    /// Opaque XML descriptor blob, only meaningful for [`Command::SetSysXml`].
    pub xml: Vec<u8>,
}

/// Fixed byte size of the wire-encoded [`Request`].
pub const REQUEST_WIRE_SIZE: usize = size_of::<u32>() // command
    + BUF_MAX_SIZE // certs
    + size_of::<u32>() // kind
    + size_of::<u32>() // uid
    + size_of::<i32>() // pid
    + size_of::<u16>() // from_hidl
    + size_of::<u32>() // xml_size
    + XML_MAX_SIZE;

impl Request {
    /// Encode into the fixed-size buffer the original `CaRevMsg` struct
    /// occupies on the wire.
    pub fn to_wire(&self) -> Box<[u8; REQUEST_WIRE_SIZE]> {
        let mut buf = Box::new([0u8; REQUEST_WIRE_SIZE]);
        let mut off = 0;
        write_u32(&mut buf[..], &mut off, self.command as u32);
        write_bytes(&mut buf[..], &mut off, &self.certs, BUF_MAX_SIZE);
        write_u32(&mut buf[..], &mut off, self.auth.kind as u32);
        write_u32(&mut buf[..], &mut off, self.auth.uid);
        write_u32(&mut buf[..], &mut off, self.auth.pid as u32);
        write_u16(&mut buf[..], &mut off, self.auth.from_hidl as u16);
        write_u32(&mut buf[..], &mut off, self.xml.len() as u32);
        write_bytes(&mut buf[..], &mut off, &self.xml, XML_MAX_SIZE);
        buf
    }

    /// Decode a wire-format buffer back into a [`Request`].
    pub fn from_wire(buf: &[u8; REQUEST_WIRE_SIZE]) -> Option<Request> {
        let mut off = 0;
        let command = Command::from_raw(read_u32(buf, &mut off))?;
        let certs = read_bytes(buf, &mut off, BUF_MAX_SIZE).to_vec();
        let kind = CaKind::from_raw(read_u32(buf, &mut off));
        let uid = read_u32(buf, &mut off);
        let pid = read_u32(buf, &mut off) as i32;
        let from_hidl = read_u16(buf, &mut off) != 0;
        let xml_size = read_u32(buf, &mut off) as usize;
        let xml_size = xml_size.min(XML_MAX_SIZE);
        let xml = read_bytes(buf, &mut off, XML_MAX_SIZE)[..xml_size].to_vec();
        Some(Request {
            command,
            auth: CaAuthInfo {
                kind,
                uid,
                pid,
                from_hidl,
            },
            certs,
            xml,
        })
    }
}

/// The broker's reply base message (`RecvTeecdMsg`): its own declared
/// protocol version, plus the Trusted OS max API level when the request
/// was [`Command::GetTeeVersion`]. A `GET_FD` reply additionally carries
/// one file descriptor over an `SCM_RIGHTS` ancillary message, which is
/// not representable in this struct and is instead handled by the
/// transport layer directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Response {
    /// Broker's major protocol version.
    pub major: u16,
    /// Broker's minor protocol version.
    pub minor: u16,
    /// Trusted OS max API level, valid only for [`Command::GetTeeVersion`].
    pub tee_max_api_level: u32,
}

/// Fixed byte size of the wire-encoded [`Response`].
pub const RESPONSE_WIRE_SIZE: usize = size_of::<Response>();

impl Response {
    /// Encode to raw bytes, matching the C struct's in-memory layout.
    pub fn to_wire(self) -> [u8; RESPONSE_WIRE_SIZE] {
        let mut buf = [0u8; RESPONSE_WIRE_SIZE];
        buf[0..2].copy_from_slice(&self.major.to_ne_bytes());
        buf[2..4].copy_from_slice(&self.minor.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.tee_max_api_level.to_ne_bytes());
        buf
    }

    /// Decode raw bytes produced by [`Response::to_wire`].
    pub fn from_wire(buf: &[u8; RESPONSE_WIRE_SIZE]) -> Response {
        Response {
            major: u16::from_ne_bytes([buf[0], buf[1]]),
            minor: u16::from_ne_bytes([buf[2], buf[3]]),
            tee_max_api_level: u32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

fn write_u32(buf: &mut [u8], off: &mut usize, v: u32) {
    buf[*off..*off + 4].copy_from_slice(&v.to_ne_bytes());
    *off += 4;
}

fn write_u16(buf: &mut [u8], off: &mut usize, v: u16) {
    buf[*off..*off + 2].copy_from_slice(&v.to_ne_bytes());
    *off += 2;
}

fn write_bytes(buf: &mut [u8], off: &mut usize, data: &[u8], field_len: usize) {
    let n = data.len().min(field_len);
    buf[*off..*off + n].copy_from_slice(&data[..n]);
    *off += field_len;
}

fn read_u32(buf: &[u8], off: &mut usize) -> u32 {
    let v = u32::from_ne_bytes(buf[*off..*off + 4].try_into().unwrap());
    *off += 4;
    v
}

fn read_u16(buf: &[u8], off: &mut usize) -> u16 {
    let v = u16::from_ne_bytes(buf[*off..*off + 2].try_into().unwrap());
    *off += 2;
    v
}

fn read_bytes<'a>(buf: &'a [u8], off: &mut usize, field_len: usize) -> &'a [u8] {
    let slice = &buf[*off..*off + field_len];
    *off += field_len;
    slice
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        let req = Request {
            command: Command::GetFd,
            auth: CaAuthInfo {
                kind: CaKind::App,
                uid: 1000,
                pid: 42,
                from_hidl: false,
            },
            certs: vec![1, 2, 3],
            xml: vec![],
        };
        let wire = req.to_wire();
        let decoded = Request::from_wire(&wire).unwrap();
        assert_eq!(decoded.command, Command::GetFd);
        assert_eq!(decoded.auth.uid, 1000);
        assert_eq!(decoded.auth.pid, 42);
        assert_eq!(&decoded.certs[..3], &[1, 2, 3]);
    }

    #[test]
    fn response_round_trips() {
        let resp = Response {
            major: 1,
            minor: 2,
            tee_max_api_level: 42,
        };
        assert_eq!(Response::from_wire(&resp.to_wire()), resp);
    }

    #[test]
    fn unknown_command_rejected() {
        assert!(Command::from_raw(999).is_none());
    }

    #[test]
    fn unknown_ca_kind_falls_back_to_app() {
        assert_eq!(CaKind::from_raw(999), CaKind::App);
    }
}
