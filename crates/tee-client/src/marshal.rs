//! Translating a caller's typed operation parameters into the packed
//! `param_types` word and [`ClientParam`] array the driver expects, and
//! copying results back out afterwards.
//!
//! Grounded on the `TEEC_EncodeParam` / `TEEC_EncodeTempParam` /
//! `TEEC_EncodePartialParam` / `TEEC_EncodeValueParam` family in
//! `original_source/src/libteec_vendor/tee_client_api.c`: that code
//! switches on the caller's `paramTypes` nibble and re-casts a union
//! field; here the switch is replaced by matching on an owned, typed
//! [`Param`] enum, so there is no way to write a `Value` through a slot
//! the caller declared as a `Temp` memref.

use tee_wire::client::{
    pack_param_types, ClientParam, ParamMemrefPartial, ParamTempMemref, ParamType, ParamValue,
};
use tee_wire::PARAM_NUM;

/// One of the four parameters passed to [`crate::Session::invoke`],
/// borrowing any buffers for the lifetime of the call.
pub enum Param<'a> {
    /// Slot unused.
    None,
    /// A value pair the TA only reads.
    ValueIn {
        /// First half of the pair.
        a: u32,
        /// Second half of the pair.
        b: u32,
    },
    /// A value pair the TA writes; the caller supplies storage to receive it.
    ValueOut {
        /// Receives the TA's first half.
        a: &'a mut u32,
        /// Receives the TA's second half.
        b: &'a mut u32,
    },
    /// A value pair the TA both reads and writes.
    ValueInOut {
        /// Read on entry, overwritten on return.
        a: &'a mut u32,
        /// Read on entry, overwritten on return.
        b: &'a mut u32,
    },
    /// A standalone buffer the TA only reads.
    TempIn(&'a [u8]),
    /// A standalone buffer the TA writes; `len()` is the capacity offered.
    TempOut(&'a mut [u8]),
    /// A standalone buffer the TA both reads and writes.
    TempInOut(&'a mut [u8]),
    /// A reference to an entire registered shared-memory block.
    MemrefWhole {
        /// Identifier assigned when the block was registered.
        shared_mem_id: u32,
    },
    /// A read-only slice of a registered shared-memory block.
    MemrefPartialIn {
        /// Identifier of the owning block.
        shared_mem_id: u32,
        /// Offset in bytes into the block.
        offset: u32,
        /// Slice length in bytes.
        size: u32,
    },
    /// A write-only slice of a registered shared-memory block.
    MemrefPartialOut {
        /// Identifier of the owning block.
        shared_mem_id: u32,
        /// Offset in bytes into the block.
        offset: u32,
        /// Capacity offered in bytes.
        size: u32,
    },
    /// A read-write slice of a registered shared-memory block.
    MemrefPartialInOut {
        /// Identifier of the owning block.
        shared_mem_id: u32,
        /// Offset in bytes into the block.
        offset: u32,
        /// Slice length in bytes.
        size: u32,
    },
}

impl Param<'_> {
    fn param_type(&self) -> ParamType {
        match self {
            Param::None => ParamType::None,
            Param::ValueIn { .. } => ParamType::ValueInput,
            Param::ValueOut { .. } => ParamType::ValueOutput,
            Param::ValueInOut { .. } => ParamType::ValueInOut,
            Param::TempIn(_) => ParamType::MemrefTempInput,
            Param::TempOut(_) => ParamType::MemrefTempOutput,
            Param::TempInOut(_) => ParamType::MemrefTempInOut,
            Param::MemrefWhole { .. } => ParamType::MemrefWhole,
            Param::MemrefPartialIn { .. } => ParamType::MemrefPartialInput,
            Param::MemrefPartialOut { .. } => ParamType::MemrefPartialOutput,
            Param::MemrefPartialInOut { .. } => ParamType::MemrefPartialInOut,
        }
    }

    fn encode(&self) -> ClientParam {
        match self {
            Param::None => ClientParam::None,
            Param::ValueIn { a, b } => ClientParam::Value(ParamValue { a: *a, b: *b }),
            Param::ValueOut { a, b } => ClientParam::Value(ParamValue { a: **a, b: **b }),
            Param::ValueInOut { a, b } => ClientParam::Value(ParamValue { a: **a, b: **b }),
            Param::TempIn(buf) => {
                ClientParam::TempMemref(ParamTempMemref::from_ptr(buf.as_ptr(), buf.len() as u32))
            }
            Param::TempOut(buf) => {
                ClientParam::TempMemref(ParamTempMemref::from_ptr(buf.as_ptr(), buf.len() as u32))
            }
            Param::TempInOut(buf) => {
                ClientParam::TempMemref(ParamTempMemref::from_ptr(buf.as_ptr(), buf.len() as u32))
            }
            Param::MemrefWhole { shared_mem_id } => ClientParam::MemrefPartial(ParamMemrefPartial {
                shared_mem_id: *shared_mem_id,
                offset: 0,
                size: 0,
            }),
            Param::MemrefPartialIn {
                shared_mem_id,
                offset,
                size,
            }
            | Param::MemrefPartialOut {
                shared_mem_id,
                offset,
                size,
            }
            | Param::MemrefPartialInOut {
                shared_mem_id,
                offset,
                size,
            } => ClientParam::MemrefPartial(ParamMemrefPartial {
                shared_mem_id: *shared_mem_id,
                offset: *offset,
                size: *size,
            }),
        }
    }

    /// Copy the driver's result for this slot back into the caller's
    /// output storage. No-op for input-only slots.
    fn write_back(&mut self, encoded: &ClientParam) {
        match (self, encoded) {
            (Param::ValueOut { a, b }, ClientParam::Value(v)) => {
                **a = v.a;
                **b = v.b;
            }
            (Param::ValueInOut { a, b }, ClientParam::Value(v)) => {
                **a = v.a;
                **b = v.b;
            }
            // Temp/partial output buffers are written to directly by the
            // TEE through the shared address this slot carried; nothing
            // further to copy here. Actual-length reporting for short
            // writes is exposed separately via `updated_size`.
            _ => {}
        }
    }
}

/// Packed [`ParamType`] word plus the four encoded slots, ready to embed
/// into a [`tee_wire::client::ClientContext`].
pub struct Encoded {
    /// Packed `param_types` word.
    pub param_types: u32,
    /// The four encoded driver-facing parameters.
    pub params: [ClientParam; PARAM_NUM],
}

/// Encode a caller's parameter array for a single invocation.
pub fn encode(params: &[Param<'_>; PARAM_NUM]) -> Encoded {
    let mut types = [ParamType::None; PARAM_NUM];
    let mut encoded = [ClientParam::None; PARAM_NUM];
    for i in 0..PARAM_NUM {
        types[i] = params[i].param_type();
        encoded[i] = params[i].encode();
    }
    Encoded {
        param_types: pack_param_types(types),
        params: encoded,
    }
}

/// Copy the driver's returned slots back into the caller's output
/// parameters after a call completes.
pub fn write_back(params: &mut [Param<'_>; PARAM_NUM], returned: &[ClientParam; PARAM_NUM]) {
    for (param, encoded) in params.iter_mut().zip(returned.iter()) {
        param.write_back(encoded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_value_pair_types() {
        let mut out_a = 0u32;
        let mut out_b = 0u32;
        let params = [
            Param::ValueIn { a: 1, b: 2 },
            Param::ValueOut {
                a: &mut out_a,
                b: &mut out_b,
            },
            Param::None,
            Param::None,
        ];
        let encoded = encode(&params);
        let types = tee_wire::client::unpack_param_types(encoded.param_types);
        assert_eq!(types[0], ParamType::ValueInput);
        assert_eq!(types[1], ParamType::ValueOutput);
        assert_eq!(types[2], ParamType::None);
    }

    #[test]
    fn write_back_updates_value_out() {
        let mut out_a = 0u32;
        let mut out_b = 0u32;
        let mut params = [
            Param::ValueOut {
                a: &mut out_a,
                b: &mut out_b,
            },
            Param::None,
            Param::None,
            Param::None,
        ];
        let returned = [
            ClientParam::Value(ParamValue { a: 9, b: 8 }),
            ClientParam::None,
            ClientParam::None,
            ClientParam::None,
        ];
        write_back(&mut params, &returned);
        assert_eq!(out_a, 9);
        assert_eq!(out_b, 8);
    }
}
