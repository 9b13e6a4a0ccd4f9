//! On-wire shapes exchanged with the kernel driver through `ioctl(2)`.
//!
//! Grounded on `original_source/src/inc/tc_ns_client.h`'s
//! `TC_NS_ClientContext`/`TC_NS_ClientParam`/`TC_NS_ClientLogin`/
//! `TC_NS_ClientReturn` family. Field names follow the driver's ABI, not
//! Rust naming conventions, because these structs are read and written
//! byte-for-byte by a kernel module that was never told about this crate.

use crate::{error::DriverOutcome, uuid::Uuid, H_OFFSET, PARAM_NUM};

/// The four parameter "shapes" a single slot in a [`ClientContext`] can
/// take, packed two bits at a time into the session's `param_types` word.
///
/// Mirrors the `TEEC_NONE`/`TEEC_VALUE_*`/`TEEC_MEMREF_*` family from the
/// original client header's `TEEC_PARAM_TYPE_GET` macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ParamType {
    /// Slot carries no data.
    None = 0x0,
    /// Slot carries a `(value_a, value_b)` pair, TA reads both.
    ValueInput = 0x1,
    /// Slot carries a `(value_a, value_b)` pair, TA writes both.
    ValueOutput = 0x2,
    /// Slot carries a `(value_a, value_b)` pair, TA reads then writes.
    ValueInOut = 0x3,
    /// Slot carries a standalone buffer the TA reads.
    MemrefTempInput = 0x5,
    /// Slot carries a standalone buffer the TA writes.
    MemrefTempOutput = 0x6,
    /// Slot carries a standalone buffer the TA reads then writes.
    MemrefTempInOut = 0x7,
    /// Slot references a whole previously-registered [`SharedMemory`].
    ///
    /// [`SharedMemory`]: ../../tee_client/registry/struct.SharedMemory.html
    MemrefWhole = 0xc,
    /// Slot references a read-only slice of a registered shared memory.
    MemrefPartialInput = 0xd,
    /// Slot references a write-only slice of a registered shared memory.
    MemrefPartialOutput = 0xe,
    /// Slot references a read-write slice of a registered shared memory.
    MemrefPartialInOut = 0xf,
}

impl ParamType {
    /// Decode one 4-bit nibble of a packed `param_types` word.
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        Some(match nibble {
            0x0 => ParamType::None,
            0x1 => ParamType::ValueInput,
            0x2 => ParamType::ValueOutput,
            0x3 => ParamType::ValueInOut,
            0x5 => ParamType::MemrefTempInput,
            0x6 => ParamType::MemrefTempOutput,
            0x7 => ParamType::MemrefTempInOut,
            0xc => ParamType::MemrefWhole,
            0xd => ParamType::MemrefPartialInput,
            0xe => ParamType::MemrefPartialOutput,
            0xf => ParamType::MemrefPartialInOut,
            _ => return None,
        })
    }

    /// Whether the TA is expected to read this slot's input side.
    pub const fn is_input(self) -> bool {
        matches!(
            self,
            ParamType::ValueInput
                | ParamType::ValueInOut
                | ParamType::MemrefTempInput
                | ParamType::MemrefTempInOut
                | ParamType::MemrefWhole
                | ParamType::MemrefPartialInput
                | ParamType::MemrefPartialInOut
        )
    }

    /// Whether the TA is expected to write this slot's output side.
    pub const fn is_output(self) -> bool {
        matches!(
            self,
            ParamType::ValueOutput
                | ParamType::ValueInOut
                | ParamType::MemrefTempOutput
                | ParamType::MemrefTempInOut
                | ParamType::MemrefWhole
                | ParamType::MemrefPartialOutput
                | ParamType::MemrefPartialInOut
        )
    }

    /// Whether this slot carries a memory reference rather than a value pair.
    pub const fn is_memref(self) -> bool {
        !matches!(
            self,
            ParamType::None | ParamType::ValueInput | ParamType::ValueOutput | ParamType::ValueInOut
        )
    }
}

/// Pack four [`ParamType`] nibbles into the single word the driver expects
/// in `TC_NS_ClientContext::param_types`.
pub fn pack_param_types(types: [ParamType; PARAM_NUM]) -> u32 {
    types
        .iter()
        .enumerate()
        .fold(0u32, |acc, (i, t)| acc | ((*t as u32) << (i * 4)))
}

/// Unpack a `param_types` word back into four [`ParamType`] slots. Any
/// nibble the driver does not recognize decodes as [`ParamType::None`].
pub fn unpack_param_types(word: u32) -> [ParamType; PARAM_NUM] {
    let mut out = [ParamType::None; PARAM_NUM];
    for (i, slot) in out.iter_mut().enumerate() {
        let nibble = ((word >> (i * 4)) & 0xf) as u8;
        *slot = ParamType::from_nibble(nibble).unwrap_or(ParamType::None);
    }
    out
}

/// A value-pair parameter (`TEEC_Value`), used by [`ParamType::ValueInput`]
/// / `ValueOutput` / `ValueInOut` slots.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ParamValue {
    /// First half of the pair.
    pub a: u32,
    /// Second half of the pair.
    pub b: u32,
}

/// A temporary-buffer memory reference (`TEEC_TempMemoryReference`). The
/// buffer's address is split into low/high 32-bit halves because the
/// driver struct is 32-bit clean even on a 64-bit host.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ParamTempMemref {
    /// Low 32 bits of the buffer pointer.
    pub buffer_low: u32,
    /// High 32 bits of the buffer pointer.
    pub buffer_high: u32,
    /// Buffer size in bytes (input) or bytes actually used (output).
    pub size: u32,
}

impl ParamTempMemref {
    /// Split a host pointer into the driver's low/high halves.
    pub fn from_ptr(ptr: *const u8, size: u32) -> Self {
        let addr = ptr as u64;
        ParamTempMemref {
            buffer_low: (addr & 0xffff_ffff) as u32,
            buffer_high: (addr >> H_OFFSET) as u32,
            size,
        }
    }

    /// Reassemble the host pointer from its low/high halves.
    pub fn as_ptr(&self) -> *const u8 {
        (((self.buffer_high as u64) << H_OFFSET) | self.buffer_low as u64) as *const u8
    }
}

/// A reference into a previously-registered shared memory block
/// (`TEEC_RegisteredMemoryReference`), addressed by the shared-memory
/// handle's `shared_mem_id` plus an offset/size pair.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ParamMemrefPartial {
    /// Identifier of the shared memory block this slice belongs to.
    pub shared_mem_id: u32,
    /// Offset in bytes into the block.
    pub offset: u32,
    /// Slice length in bytes (input) or bytes actually used (output).
    pub size: u32,
}

/// One of the four operation parameters, tagged by the slot's
/// [`ParamType`] at the point of use (the driver struct itself is an
/// untagged union; this enum is this crate's typed substitute, decoded
/// against the session's `param_types` word).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientParam {
    /// Slot not in use.
    None,
    /// A value pair.
    Value(ParamValue),
    /// A standalone temporary buffer.
    TempMemref(ParamTempMemref),
    /// A slice of a registered shared memory block.
    MemrefPartial(ParamMemrefPartial),
}

impl Default for ClientParam {
    fn default() -> Self {
        ClientParam::None
    }
}

/// Caller identity the driver enforces before letting a session open
/// (`TC_NS_ClientLogin`). Mirrors the `TEEC_LOGIN_*` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ClientLogin {
    /// One of the `TEEC_LOGIN_*` method identifiers.
    pub method: u32,
    /// Method-specific identity data (for `LOGIN_IDENTIFY`, a uid).
    pub identity: u32,
}

impl ClientLogin {
    /// Public, unauthenticated login (`TEEC_LOGIN_PUBLIC`).
    pub const PUBLIC: ClientLogin = ClientLogin {
        method: 0,
        identity: 0,
    };

    /// Login identified by the calling process's Linux uid.
    pub fn identify(uid: u32) -> Self {
        ClientLogin {
            method: 2,
            identity: uid,
        }
    }
}

/// The detail the TEE reports back alongside a non-success return
/// (`TC_NS_ClientReturn`). Converts directly into a [`DriverOutcome`]
/// once the ioctl's own `errno` is known.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ClientReturn {
    /// TEE-reported error code.
    pub code: u32,
    /// TEE-reported origin of the failure.
    pub origin: u32,
}

impl ClientReturn {
    /// Combine with the ioctl's raw return value into a [`DriverOutcome`].
    pub const fn into_outcome(self, errno: i32) -> DriverOutcome {
        DriverOutcome {
            errno,
            code: self.code,
            origin: self.origin,
        }
    }
}

/// The full per-call context handed to the driver on every
/// `TC_NS_CLIENT_IOCTL_SEND_CMD`/`OPEN_SESSION` ioctl
/// (`TC_NS_ClientContext`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ClientContext {
    /// Target Trusted Application identifier.
    pub ta_uuid: Uuid,
    /// Command identifier the TA should dispatch on (ignored for
    /// `OPEN_SESSION`).
    pub cmd_id: u32,
    /// Packed [`ParamType`] nibbles, see [`pack_param_types`].
    pub param_types: u32,
    /// The four operation parameters, typed uniformly; callers decode
    /// against `param_types` when marshalling to/from the union the
    /// driver actually expects.
    pub params: [ClientParam; PARAM_NUM],
    /// Caller identity enforced by the driver.
    pub login: ClientLogin,
    /// Session identifier assigned by the driver on open, reused on every
    /// subsequent send/cancel/close for this session.
    pub session_id: u32,
    /// Result detail populated by the driver after the call returns.
    pub returns: ClientReturn,
}

impl ClientContext {
    /// Build a bare context with every slot at [`ParamType::None`], ready
    /// for a caller to fill in parameters before marshalling.
    pub fn new(ta_uuid: Uuid, cmd_id: u32, login: ClientLogin) -> Self {
        ClientContext {
            ta_uuid,
            cmd_id,
            param_types: 0,
            params: [ClientParam::None; PARAM_NUM],
            login,
            session_id: 0,
            returns: ClientReturn::default(),
        }
    }

    /// Set slot `index`'s type and value together, keeping `param_types`
    /// consistent with `params`.
    pub fn set_param(&mut self, index: usize, ty: ParamType, value: ClientParam) {
        assert!(index < PARAM_NUM, "parameter index out of range");
        let mut types = unpack_param_types(self.param_types);
        types[index] = ty;
        self.param_types = pack_param_types(types);
        self.params[index] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_and_unpacks_param_types() {
        let types = [
            ParamType::ValueInput,
            ParamType::MemrefTempOutput,
            ParamType::None,
            ParamType::MemrefPartialInOut,
        ];
        let word = pack_param_types(types);
        assert_eq!(unpack_param_types(word), types);
    }

    #[test]
    fn temp_memref_round_trips_pointer() {
        let buf = [0u8; 16];
        let memref = ParamTempMemref::from_ptr(buf.as_ptr(), buf.len() as u32);
        assert_eq!(memref.as_ptr(), buf.as_ptr());
    }

    #[test]
    fn set_param_updates_type_and_value_together() {
        let mut ctx = ClientContext::new(Uuid::from_bytes([0; 16]), 1, ClientLogin::PUBLIC);
        ctx.set_param(
            1,
            ParamType::ValueInOut,
            ClientParam::Value(ParamValue { a: 4, b: 2 }),
        );
        let types = unpack_param_types(ctx.param_types);
        assert_eq!(types[1], ParamType::ValueInOut);
        assert_eq!(ctx.params[1], ClientParam::Value(ParamValue { a: 4, b: 2 }));
    }

    #[test]
    fn identify_login_carries_uid() {
        let login = ClientLogin::identify(1000);
        assert_eq!(login.identity, 1000);
    }
}
